//! `HELLOTS` / `READY` handshake

use sha1::{Digest, Sha1};

use super::message::ClientCommand;

/// Product key presented to the engine.
pub const DEFAULT_PRODUCT_KEY: &str = "n51LvQoTlJzNGaFxseRK-uvnvX-sD4Vm5Axwmc4UcoD-jruxmKsuJaH0eVgE";

/// Builds the `READY` reply for a `HELLOTS` greeting.
///
/// The token is `<product key prefix>-<sha1(engine key + product key)>`, where
/// the prefix is everything before the first `-` of the product key.
pub fn ready_reply(engine_key: Option<&str>, product_key: &str) -> ClientCommand {
    let key = engine_key.map(|engine_key| {
        let digest = Sha1::digest(format!("{engine_key}{product_key}").as_bytes());
        let prefix = product_key.split('-').next().unwrap_or(product_key);
        format!("{prefix}-{}", hex::encode(digest))
    });
    ClientCommand::Ready { key }
}
