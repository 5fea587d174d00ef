pub mod audit;
pub mod commit;
pub mod config;
pub mod engine;
pub mod fetch;
pub mod fingerprint;
pub mod key;
pub mod ledger;
pub mod lock;
pub mod paths;
pub mod state;
pub mod store;
pub mod util;
pub mod warn;
pub mod watcher;
