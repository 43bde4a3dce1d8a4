pub mod categories;
pub mod chat;
pub mod cron;
pub mod health;
pub mod invoices;
pub mod users;
