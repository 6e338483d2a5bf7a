pub mod email;
pub mod goals;
pub mod health;
pub mod leads;
pub mod modules;
pub mod password;
pub mod social;
pub mod users;
pub mod waitlist;
