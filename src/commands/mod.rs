pub mod audit;
pub mod cache;
pub mod catalog;
pub mod db;
pub mod export;
pub mod ledger;
pub mod scoring;
pub mod session;
pub mod settings;
