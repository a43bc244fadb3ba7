pub mod currencies;
pub mod rates;
pub mod serve;
pub mod setup;
pub mod ui;
pub mod watch;
