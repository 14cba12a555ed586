//! Application modules registered against the bridge daemon's catalog.
//!
//! Each module is an independent set of `(module, function)` handlers; the
//! broker knows nothing about what a database connection or a cipher
//! context *is* — only how to store it under a handle. See
//! [`bridge_core::ModuleCatalog`].

pub mod crypto;
pub mod datetime;
pub mod db;
pub mod excel;
pub mod fslock;
pub mod http;
pub mod logging;
pub mod params;
pub mod smtp;
pub mod sftp;
pub mod system;
pub mod xml;

use bridge_core::ModuleCatalog;

/// Registers every application module plus `system` introspection against
/// `catalog`. The caller supplies the metrics/registry handles `system`
/// needs since those live on the broker, not in this crate.
pub fn register_all(catalog: &mut ModuleCatalog, system_deps: system::SystemDeps) {
    system::register(catalog, system_deps);
    db::register(catalog);
    http::register(catalog);
    crypto::register(catalog);
    xml::register(catalog);
    excel::register(catalog);
    smtp::register(catalog);
    sftp::register(catalog);
    logging::register(catalog);
    fslock::register(catalog);
    datetime::register(catalog);
}
