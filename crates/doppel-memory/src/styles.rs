//! Style-profile persistence.

use rusqlite::params;

use crate::error::Result;
use crate::store::MemoryStore;
use crate::types::StyleProfile;

impl MemoryStore {
    pub fn get_style(&self, contact_key: &str) -> Result<Option<StyleProfile>> {
        let db = self.conn();
        match db.query_row(
            "SELECT contact_key, avg_message_length, emoji_frequency, formality_score,
                    punctuation_style, greeting_style, sign_off_style, sample_count,
                    feature_confidence, last_updated
             FROM style_profiles WHERE contact_key = ?1",
            params![contact_key],
            row_to_style,
        ) {
            Ok(s) => Ok(Some(s)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn upsert_style(&self, profile: &StyleProfile) -> Result<()> {
        let punctuation = serde_json::to_string(&profile.punctuation_style)?;
        let greetings = serde_json::to_string(&profile.greeting_style)?;
        let sign_offs = serde_json::to_string(&profile.sign_off_style)?;
        let confidence = serde_json::to_string(&profile.feature_confidence)?;
        let db = self.conn();
        db.execute(
            "INSERT INTO style_profiles
                 (contact_key, avg_message_length, emoji_frequency, formality_score,
                  punctuation_style, greeting_style, sign_off_style, sample_count,
                  feature_confidence, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(contact_key) DO UPDATE SET
                 avg_message_length = excluded.avg_message_length,
                 emoji_frequency    = excluded.emoji_frequency,
                 formality_score    = excluded.formality_score,
                 punctuation_style  = excluded.punctuation_style,
                 greeting_style     = excluded.greeting_style,
                 sign_off_style     = excluded.sign_off_style,
                 sample_count       = excluded.sample_count,
                 feature_confidence = excluded.feature_confidence,
                 last_updated       = excluded.last_updated",
            params![
                profile.contact_key,
                profile.avg_message_length,
                profile.emoji_frequency,
                profile.formality_score,
                punctuation,
                greetings,
                sign_offs,
                profile.sample_count,
                confidence,
                profile.last_updated
            ],
        )?;
        Ok(())
    }
}

fn row_to_style(row: &rusqlite::Row<'_>) -> rusqlite::Result<StyleProfile> {
    let punctuation: String = row.get(4)?;
    let greetings: String = row.get(5)?;
    let sign_offs: String = row.get(6)?;
    let confidence: String = row.get(8)?;
    Ok(StyleProfile {
        contact_key: row.get(0)?,
        avg_message_length: row.get(1)?,
        emoji_frequency: row.get(2)?,
        formality_score: row.get(3)?,
        punctuation_style: serde_json::from_str(&punctuation).unwrap_or_default(),
        greeting_style: serde_json::from_str(&greetings).unwrap_or_default(),
        sign_off_style: serde_json::from_str(&sign_offs).unwrap_or_default(),
        sample_count: row.get::<_, i64>(7)? as u32,
        feature_confidence: serde_json::from_str(&confidence).unwrap_or_default(),
        last_updated: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::store::MemoryStore;
    use crate::types::{StyleConfidence, StyleProfile};

    #[test]
    fn style_round_trip() {
        let mem = MemoryStore::open_in_memory().unwrap();
        let mut profile = StyleProfile::new("telegram:1");
        profile.avg_message_length = 42.5;
        profile.emoji_frequency = 0.25;
        profile.sample_count = 12;
        profile.greeting_style = vec!["hey".into(), "hi".into()];
        mem.upsert_style(&profile).unwrap();

        let read = mem.get_style("telegram:1").unwrap().unwrap();
        assert_eq!(read.avg_message_length, 42.5);
        assert_eq!(read.greeting_style, vec!["hey", "hi"]);
        assert_eq!(read.confidence(), StyleConfidence::Medium);
    }

    #[test]
    fn missing_profile_is_none() {
        let mem = MemoryStore::open_in_memory().unwrap();
        assert!(mem.get_style("telegram:404").unwrap().is_none());
    }
}
