//! Vessel repository: MMSI-keyed upsert under concurrency, absorbed-chain
//! resolution to a canonical vessel.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use tracing::warn;

use super::{sqlite_is_uniqueness_violation, Database};
use crate::error::Result;
use crate::models::{AisClass, FlagRisk, PiStatus, Vessel};

/// Maximum hops to resolve an absorbed vessel's `merged_into_vessel_id`
/// chain to its canonical (non-absorbed) vessel, per §3's invariant.
pub const MAX_MERGE_CHAIN_HOPS: u32 = 10;

fn row_to_vessel(row: &rusqlite::Row) -> rusqlite::Result<Vessel> {
    let flag_risk: String = row.get("flag_risk")?;
    let ais_class: String = row.get("ais_class")?;
    let pi_status: String = row.get("pi_status")?;
    let first_seen: Option<String> = row.get("mmsi_first_seen_utc")?;

    Ok(Vessel {
        vessel_id: row.get("vessel_id")?,
        mmsi: row.get("mmsi")?,
        imo: row.get("imo")?,
        name: row.get("name")?,
        callsign: row.get("callsign")?,
        flag: row.get("flag")?,
        flag_risk: parse_flag_risk(&flag_risk),
        vessel_type: row.get("vessel_type")?,
        deadweight: row.get("deadweight")?,
        year_built: row.get("year_built")?,
        ais_class: parse_ais_class(&ais_class),
        mmsi_first_seen_utc: first_seen
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
        vessel_laid_up_30d: row.get::<_, i64>("vessel_laid_up_30d")? != 0,
        vessel_laid_up_60d: row.get::<_, i64>("vessel_laid_up_60d")? != 0,
        vessel_laid_up_in_sts_zone: row.get::<_, i64>("vessel_laid_up_in_sts_zone")? != 0,
        pi_status: parse_pi_status(&pi_status),
        ism_manager: row.get("ism_manager")?,
        merged_into_vessel_id: row.get("merged_into_vessel_id")?,
    })
}

fn parse_flag_risk(s: &str) -> FlagRisk {
    match s {
        "low_risk" => FlagRisk::LowRisk,
        "medium_risk" => FlagRisk::MediumRisk,
        "high_risk" => FlagRisk::HighRisk,
        _ => FlagRisk::Unknown,
    }
}

fn parse_ais_class(s: &str) -> AisClass {
    match s {
        "a" | "A" => AisClass::A,
        "b" | "B" => AisClass::B,
        _ => AisClass::Unknown,
    }
}

fn parse_pi_status(s: &str) -> PiStatus {
    match s {
        "ig_club_member" => PiStatus::IgClubMember,
        "non_ig_club" => PiStatus::NonIgClub,
        "uninsured" => PiStatus::Uninsured,
        _ => PiStatus::Unknown,
    }
}

impl Database {
    pub fn get_vessel_by_mmsi(&self, mmsi: &str) -> Result<Option<Vessel>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT * FROM vessels WHERE mmsi = ?1")?;
        let v = stmt
            .query_row(params![mmsi], row_to_vessel)
            .optional()?;
        Ok(v)
    }

    pub fn get_vessel(&self, vessel_id: i64) -> Result<Option<Vessel>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT * FROM vessels WHERE vessel_id = ?1")?;
        let v = stmt.query_row(params![vessel_id], row_to_vessel).optional()?;
        Ok(v)
    }

    /// Resolves a (possibly absorbed) vessel id to its canonical, non-absorbed
    /// vessel id, following `merged_into_vessel_id` up to
    /// `MAX_MERGE_CHAIN_HOPS` times. Any AIS Position insert must reference
    /// the canonical id, per §3.
    pub fn resolve_canonical_vessel(&self, vessel_id: i64) -> Result<i64> {
        let conn = self.conn.lock();
        let mut current = vessel_id;
        for _ in 0..MAX_MERGE_CHAIN_HOPS {
            let next: Option<i64> = conn
                .query_row(
                    "SELECT merged_into_vessel_id FROM vessels WHERE vessel_id = ?1",
                    params![current],
                    |row| row.get(0),
                )
                .optional()?
                .flatten();
            match next {
                Some(n) => current = n,
                None => return Ok(current),
            }
        }
        warn!(vessel_id, "merge chain exceeded max hops, did not resolve to a canonical vessel");
        Ok(current)
    }

    /// Resolves or creates a vessel by MMSI, using a nested savepoint around
    /// the insert so concurrent workers racing on the same new MMSI recover
    /// by re-querying rather than aborting the caller's outer transaction.
    /// The caller owns the commit of that outer transaction; this method
    /// only flushes (see SPEC_FULL.md §4.1's savepoint protocol).
    pub fn upsert_vessel(&self, mmsi: &str, flag: Option<&str>, flag_risk: FlagRisk) -> Result<i64> {
        let conn = self.conn.lock();

        if let Some(id) = conn
            .query_row(
                "SELECT vessel_id FROM vessels WHERE mmsi = ?1",
                params![mmsi],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
        {
            return Ok(id);
        }

        conn.execute_batch("SAVEPOINT vessel_upsert")?;
        let now = Utc::now().to_rfc3339();
        let insert_result = conn.execute(
            "INSERT INTO vessels (mmsi, flag, flag_risk, ais_class, mmsi_first_seen_utc, pi_status)
             VALUES (?1, ?2, ?3, 'unknown', ?4, 'unknown')",
            params![mmsi, flag, flag_risk_str(flag_risk), now],
        );

        match insert_result {
            Ok(_) => {
                let id = conn.last_insert_rowid();
                conn.execute_batch("RELEASE SAVEPOINT vessel_upsert")?;
                Ok(id)
            }
            Err(e) if sqlite_is_uniqueness_violation(&e) => {
                conn.execute_batch(
                    "ROLLBACK TO SAVEPOINT vessel_upsert; RELEASE SAVEPOINT vessel_upsert",
                )?;
                // A concurrent writer won the race; re-query rather than
                // propagating the conflict to the caller's outer transaction.
                let id: i64 = conn.query_row(
                    "SELECT vessel_id FROM vessels WHERE mmsi = ?1",
                    params![mmsi],
                    |row| row.get(0),
                )?;
                Ok(id)
            }
            Err(e) => {
                conn.execute_batch("RELEASE SAVEPOINT vessel_upsert").ok();
                Err(e.into())
            }
        }
    }
}

impl Database {
    /// Applies a `ShipStaticData` update to a vessel: only non-null fields
    /// overwrite existing values, since a static-data message may carry a
    /// subset of fields.
    pub fn update_vessel_static(
        &self,
        vessel_id: i64,
        imo: Option<&str>,
        name: Option<&str>,
        callsign: Option<&str>,
        vessel_type: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE vessels SET
                imo = COALESCE(?1, imo),
                name = COALESCE(?2, name),
                callsign = COALESCE(?3, callsign),
                vessel_type = COALESCE(?4, vessel_type)
             WHERE vessel_id = ?5",
            params![imo, name, callsign, vessel_type, vessel_id],
        )?;
        Ok(())
    }

    pub fn set_deadweight(&self, vessel_id: i64, deadweight: f64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE vessels SET deadweight = ?1 WHERE vessel_id = ?2",
            params![deadweight, vessel_id],
        )?;
        Ok(())
    }

    pub fn set_laid_up_flags(
        &self,
        vessel_id: i64,
        laid_up_30d: bool,
        laid_up_60d: bool,
        laid_up_in_sts_zone: bool,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE vessels SET vessel_laid_up_30d = ?1, vessel_laid_up_60d = ?2, vessel_laid_up_in_sts_zone = ?3
             WHERE vessel_id = ?4",
            params![laid_up_30d as i64, laid_up_60d as i64, laid_up_in_sts_zone as i64, vessel_id],
        )?;
        Ok(())
    }

    pub fn all_vessel_ids(&self) -> Result<Vec<i64>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT vessel_id FROM vessels WHERE merged_into_vessel_id IS NULL")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }
}

fn flag_risk_str(r: FlagRisk) -> &'static str {
    match r {
        FlagRisk::LowRisk => "low_risk",
        FlagRisk::MediumRisk => "medium_risk",
        FlagRisk::HighRisk => "high_risk",
        FlagRisk::Unknown => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_is_idempotent_for_same_mmsi() {
        let db = Database::open_in_memory().unwrap();
        let id1 = db.upsert_vessel("123456789", Some("PA"), FlagRisk::MediumRisk).unwrap();
        let id2 = db.upsert_vessel("123456789", Some("PA"), FlagRisk::MediumRisk).unwrap();
        assert_eq!(id1, id2);
    }

    #[test]
    fn resolve_canonical_follows_merge_chain() {
        let db = Database::open_in_memory().unwrap();
        let a = db.upsert_vessel("111111111", None, FlagRisk::Unknown).unwrap();
        let b = db.upsert_vessel("222222222", None, FlagRisk::Unknown).unwrap();
        {
            let conn = db.conn.lock();
            conn.execute(
                "UPDATE vessels SET merged_into_vessel_id = ?1 WHERE vessel_id = ?2",
                params![b, a],
            )
            .unwrap();
        }
        assert_eq!(db.resolve_canonical_vessel(a).unwrap(), b);
        assert_eq!(db.resolve_canonical_vessel(b).unwrap(), b);
    }
}
