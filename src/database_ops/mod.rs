pub mod catalog;
pub mod db;
pub mod scryfall;
pub mod worker_manager;
