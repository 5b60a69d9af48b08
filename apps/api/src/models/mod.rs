pub mod connection;
pub mod criteria;
pub mod run;
pub mod scored;
