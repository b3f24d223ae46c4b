pub mod catalog;
pub mod chat;
pub mod events;
pub mod export;
pub mod history;
pub mod images;
pub mod marks;
pub mod ratio;
