//! Approved / denied contacts and pairing requests.
//!
//! Approve and deny are idempotent: repeated calls overwrite the record
//! in place (last-write-wins per contact key) and resolve any pending
//! pairing request, so no duplicate requests remain after a transition.

use rusqlite::params;
use tracing::{debug, info};

use crate::error::Result;
use crate::store::MemoryStore;
use crate::types::{
    ApprovedContact, DeniedContact, PairingRequest, PairingStatus, Tier, FIRST_MESSAGE_MAX,
};

/// Fields describing the contact at pairing time.
#[derive(Debug, Clone, Default)]
pub struct PairingDetails {
    pub phone_number: String,
    pub display_name: Option<String>,
    pub channel: Option<String>,
    pub first_message: Option<String>,
}

impl MemoryStore {
    pub fn get_approved(&self, contact_key: &str) -> Result<Option<ApprovedContact>> {
        let db = self.conn();
        match db.query_row(
            "SELECT contact_key, phone_number, approved_at, approved_by, tier,
                    display_name, channel, notes, persona_id
             FROM approved_contacts WHERE contact_key = ?1",
            params![contact_key],
            row_to_approved,
        ) {
            Ok(c) => Ok(Some(c)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Approve a contact (idempotent upsert). A second call with a
    /// different tier updates the tier in place. Any pairing request and
    /// denial record for this contact are resolved.
    pub fn approve(
        &self,
        contact_key: &str,
        phone_number: &str,
        approved_by: &str,
        tier: Tier,
        display_name: Option<&str>,
        channel: Option<&str>,
    ) -> Result<ApprovedContact> {
        let now = chrono::Utc::now().to_rfc3339();
        let mut db = self.conn();
        let tx = db.transaction()?;
        tx.execute(
            "INSERT INTO approved_contacts
                 (contact_key, phone_number, approved_at, approved_by, tier,
                  display_name, channel, notes, persona_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, NULL)
             ON CONFLICT(contact_key) DO UPDATE SET
                 tier        = excluded.tier,
                 approved_by = excluded.approved_by",
            params![
                contact_key,
                phone_number,
                now,
                approved_by,
                tier.to_string(),
                display_name,
                channel
            ],
        )?;
        tx.execute(
            "UPDATE pairing_requests
             SET status = 'approved', approved_by = ?2, approved_at = ?3
             WHERE contact_key = ?1 AND status = 'pending'",
            params![contact_key, approved_by, now],
        )?;
        tx.execute(
            "DELETE FROM denied_contacts WHERE contact_key = ?1",
            params![contact_key],
        )?;
        tx.commit()?;
        drop(db);
        info!(contact_key, %tier, approved_by, "contact approved");

        Ok(self
            .get_approved(contact_key)?
            .expect("approved row just written"))
    }

    /// Deny a contact for `cooldown_hours` (idempotent upsert — repeated
    /// denials restart the cooldown). A pending pairing request is marked
    /// denied and the approval record, if any, is removed.
    pub fn deny(
        &self,
        contact_key: &str,
        phone_number: &str,
        denied_by: &str,
        reason: Option<&str>,
        cooldown_hours: u32,
    ) -> Result<DeniedContact> {
        let now = chrono::Utc::now();
        let expires = now + chrono::Duration::hours(i64::from(cooldown_hours));
        let now_str = now.to_rfc3339();
        let expires_str = expires.to_rfc3339();

        let mut db = self.conn();
        let tx = db.transaction()?;
        tx.execute(
            "INSERT INTO denied_contacts
                 (contact_key, phone_number, denied_at, denied_by, expires_at, reason)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(contact_key) DO UPDATE SET
                 denied_at  = excluded.denied_at,
                 denied_by  = excluded.denied_by,
                 expires_at = excluded.expires_at,
                 reason     = excluded.reason",
            params![contact_key, phone_number, now_str, denied_by, expires_str, reason],
        )?;
        tx.execute(
            "UPDATE pairing_requests SET status = 'denied'
             WHERE contact_key = ?1 AND status = 'pending'",
            params![contact_key],
        )?;
        tx.execute(
            "DELETE FROM approved_contacts WHERE contact_key = ?1",
            params![contact_key],
        )?;
        tx.commit()?;
        info!(contact_key, denied_by, "contact denied");

        Ok(DeniedContact {
            contact_key: contact_key.to_string(),
            phone_number: phone_number.to_string(),
            denied_at: now_str,
            denied_by: denied_by.to_string(),
            expires_at: expires_str,
            reason: reason.map(String::from),
        })
    }

    /// Live denial record, or `None` when absent or expired (expired rows
    /// are removed on the way out).
    pub fn get_denied(&self, contact_key: &str) -> Result<Option<DeniedContact>> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.conn();
        let row = match db.query_row(
            "SELECT contact_key, phone_number, denied_at, denied_by, expires_at, reason
             FROM denied_contacts WHERE contact_key = ?1",
            params![contact_key],
            |row| {
                Ok(DeniedContact {
                    contact_key: row.get(0)?,
                    phone_number: row.get(1)?,
                    denied_at: row.get(2)?,
                    denied_by: row.get(3)?,
                    expires_at: row.get(4)?,
                    reason: row.get(5)?,
                })
            },
        ) {
            Ok(r) => r,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if row.expires_at <= now {
            db.execute(
                "DELETE FROM denied_contacts WHERE contact_key = ?1",
                params![contact_key],
            )?;
            debug!(contact_key, "denial cooldown expired");
            return Ok(None);
        }
        Ok(Some(row))
    }

    /// Create a pairing request, or refresh `requested_at` on an existing
    /// pending one. Returns the request and whether it was newly created.
    pub fn upsert_pairing(
        &self,
        contact_key: &str,
        details: &PairingDetails,
    ) -> Result<(PairingRequest, bool)> {
        let now = chrono::Utc::now().to_rfc3339();
        let first_message = details
            .first_message
            .as_deref()
            .map(|m| m.chars().take(FIRST_MESSAGE_MAX).collect::<String>());

        let db = self.conn();
        let existing: Option<String> = match db.query_row(
            "SELECT status FROM pairing_requests WHERE contact_key = ?1",
            params![contact_key],
            |row| row.get(0),
        ) {
            Ok(s) => Some(s),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        };

        let created = match existing.as_deref() {
            None => {
                db.execute(
                    "INSERT INTO pairing_requests
                         (contact_key, phone_number, requested_at, status,
                          display_name, channel, first_message)
                     VALUES (?1, ?2, ?3, 'pending', ?4, ?5, ?6)",
                    params![
                        contact_key,
                        details.phone_number,
                        now,
                        details.display_name,
                        details.channel,
                        first_message
                    ],
                )?;
                true
            }
            Some("pending") => {
                db.execute(
                    "UPDATE pairing_requests SET requested_at = ?2 WHERE contact_key = ?1",
                    params![contact_key, now],
                )?;
                false
            }
            // A resolved (approved/denied/expired) request re-enters pending
            // when the contact writes again after the record was cleared.
            Some(_) => {
                db.execute(
                    "UPDATE pairing_requests
                     SET status = 'pending', requested_at = ?2, first_message = ?3,
                         approved_by = NULL, approved_at = NULL
                     WHERE contact_key = ?1",
                    params![contact_key, now, first_message],
                )?;
                true
            }
        };
        drop(db);

        let request = self
            .get_pairing(contact_key)?
            .expect("pairing row just written");
        Ok((request, created))
    }

    pub fn get_pairing(&self, contact_key: &str) -> Result<Option<PairingRequest>> {
        let db = self.conn();
        match db.query_row(
            "SELECT contact_key, phone_number, requested_at, status, display_name,
                    channel, first_message, approved_by, approved_at
             FROM pairing_requests WHERE contact_key = ?1",
            params![contact_key],
            row_to_pairing,
        ) {
            Ok(r) => Ok(Some(r)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// All pending pairing requests, oldest first.
    pub fn pending_pairings(&self) -> Result<Vec<PairingRequest>> {
        let db = self.conn();
        let mut stmt = db.prepare(
            "SELECT contact_key, phone_number, requested_at, status, display_name,
                    channel, first_message, approved_by, approved_at
             FROM pairing_requests WHERE status = 'pending'
             ORDER BY requested_at",
        )?;
        let rows = stmt.query_map([], row_to_pairing)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Assign (or clear) an explicit persona for an approved contact.
    pub fn set_contact_persona(
        &self,
        contact_key: &str,
        persona_id: Option<&str>,
    ) -> Result<()> {
        let db = self.conn();
        let n = db.execute(
            "UPDATE approved_contacts SET persona_id = ?2 WHERE contact_key = ?1",
            params![contact_key, persona_id],
        )?;
        if n == 0 {
            return Err(crate::error::MemoryError::NotFound(contact_key.to_string()));
        }
        Ok(())
    }
}

fn row_to_approved(row: &rusqlite::Row<'_>) -> rusqlite::Result<ApprovedContact> {
    let tier: String = row.get(4)?;
    Ok(ApprovedContact {
        contact_key: row.get(0)?,
        phone_number: row.get(1)?,
        approved_at: row.get(2)?,
        approved_by: row.get(3)?,
        tier: tier.parse().unwrap_or(Tier::Restricted),
        display_name: row.get(5)?,
        channel: row.get(6)?,
        notes: row.get(7)?,
        persona_id: row.get(8)?,
    })
}

fn row_to_pairing(row: &rusqlite::Row<'_>) -> rusqlite::Result<PairingRequest> {
    let status: String = row.get(3)?;
    Ok(PairingRequest {
        contact_key: row.get(0)?,
        phone_number: row.get(1)?,
        requested_at: row.get(2)?,
        status: status.parse().unwrap_or(PairingStatus::Expired),
        display_name: row.get(4)?,
        channel: row.get(5)?,
        first_message: row.get(6)?,
        approved_by: row.get(7)?,
        approved_at: row.get(8)?,
    })
}
