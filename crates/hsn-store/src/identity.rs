use hsn_shared::identity::IdentityExport;
use hsn_shared::types::now_secs;
use hsn_shared::Identity;
use rusqlite::{params, OptionalExtension};
use tracing::info;

use crate::database::{Database, Store};
use crate::error::{Result, StoreError};

impl Database {
    /// Load the singleton identity, if one was ever created.
    pub fn load_identity(&self) -> Result<Option<Identity>> {
        let row = self
            .conn()
            .query_row(
                "SELECT fingerprint, sign_secret, agreement_secret FROM identity WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((fingerprint, sign_hex, agree_hex)) = row else {
            return Ok(None);
        };

        let export = IdentityExport {
            fingerprint,
            sign_secret: decode_key(&sign_hex)?,
            agreement_secret: decode_key(&agree_hex)?,
        };
        Ok(Some(Identity::from_export(&export)?))
    }

    /// Insert the identity unless one already exists. Returns whether this
    /// call wrote the row.
    pub fn save_identity(&self, identity: &Identity) -> Result<bool> {
        let export = identity.to_export();
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO identity (id, fingerprint, sign_secret, agreement_secret, created_at)
             VALUES (1, ?1, ?2, ?3, ?4)",
            params![
                export.fingerprint,
                hex::encode(export.sign_secret),
                hex::encode(export.agreement_secret),
                now_secs(),
            ],
        )?;
        Ok(affected > 0)
    }
}

/// Return the persisted identity, creating and persisting one on first use.
///
/// Load and insert run in one transaction under the store lock, so
/// concurrent callers in one process all get the same identity. Across
/// processes the `INSERT OR IGNORE` on the singleton key decides the winner
/// and the losers re-read it.
pub fn initialize_identity(store: &Store) -> Result<Identity> {
    store.transaction(|db| {
        if let Some(identity) = db.load_identity()? {
            return Ok(identity);
        }

        let identity = Identity::generate();
        if db.save_identity(&identity)? {
            info!(fingerprint = %identity.fingerprint(), "generated new identity");
            return Ok(identity);
        }

        db.load_identity()?.ok_or(StoreError::NotFound)
    })
}

fn decode_key(encoded: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(encoded)?;
    bytes
        .try_into()
        .map_err(|_| StoreError::Corrupt("identity key is not 32 bytes".into()))
}
