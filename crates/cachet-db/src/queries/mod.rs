pub mod audit;
pub mod files;
pub mod folders;
pub mod sessions;
pub mod shares;
pub mod users;
