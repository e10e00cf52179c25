//! Magnet link parsing

use super::{InfoHash, TorrentError};

/// Parsed magnet link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagnetLink {
    pub info_hash: InfoHash,
    pub display_name: Option<String>,
    pub trackers: Vec<String>,
}

/// Magnet link parsing utilities.
pub struct MagnetParser;

impl MagnetParser {
    /// Returns true if the source string is a magnet URI.
    pub fn is_magnet(source: &str) -> bool {
        source
            .get(..7)
            .is_some_and(|scheme| scheme.eq_ignore_ascii_case("magnet:"))
    }

    /// Parses a magnet link into its info hash, name and trackers.
    ///
    /// # Errors
    ///
    /// - `TorrentError::InvalidMagnet` - Malformed URI or missing/invalid `xt`
    pub fn parse(magnet_uri: &str) -> Result<MagnetLink, TorrentError> {
        let magnet = magnet_url::Magnet::new(magnet_uri).map_err(|e| TorrentError::InvalidMagnet {
            reason: format!("Invalid magnet link: {e}"),
        })?;

        let info_hash = Self::extract_info_hash(magnet_uri)?;

        Ok(MagnetLink {
            info_hash,
            display_name: magnet.display_name().map(|s| s.to_string()),
            trackers: magnet.trackers().to_vec(),
        })
    }

    fn extract_info_hash(magnet_uri: &str) -> Result<InfoHash, TorrentError> {
        let query = magnet_uri.split_once('?').map(|(_, query)| query).unwrap_or("");

        for param in query.split('&') {
            let Some((key, value)) = param.split_once('=') else {
                continue;
            };
            if !key.eq_ignore_ascii_case("xt") {
                continue;
            }
            let value = urlencoding::decode(value).map_err(|_| TorrentError::InvalidMagnet {
                reason: format!("Undecodable xt parameter: {value}"),
            })?;
            if let Some(hash) = value
                .get(..9)
                .filter(|prefix| prefix.eq_ignore_ascii_case("urn:btih:"))
                .and_then(|_| value.get(9..))
            {
                return InfoHash::from_hex(hash).map_err(|reason| TorrentError::InvalidMagnet {
                    reason,
                });
            }
        }

        Err(TorrentError::InvalidMagnet {
            reason: format!("Missing btih info hash in magnet link: {magnet_uri}"),
        })
    }
}
