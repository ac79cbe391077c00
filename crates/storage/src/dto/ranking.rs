use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::models::{Horse, PositionChange, RankingEntry, Rider, RowDirection};

/// Ranking row as served by the REST API and the socket channel.
///
/// The REST serializer names the participant `participant` and the score
/// `average_score`, and may send `null` for either number.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RankingRecord {
    #[serde(alias = "participant")]
    pub participant_id: i64,
    pub position: u32,
    #[serde(default, alias = "average_score", deserialize_with = "decimal_or_zero")]
    pub average: Decimal,
    #[serde(default, deserialize_with = "decimal_or_zero")]
    pub percentage: Decimal,
    #[serde(default)]
    pub rider: Rider,
    #[serde(default)]
    pub horse: Horse,
}

/// Ranking row as stored under `rankings/{competition_id}/{participant_id}`
/// in the document store.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreRankingRecord {
    #[serde(default)]
    pub rider: StoreRider,
    #[serde(default)]
    pub horse: Horse,
    #[serde(default)]
    pub average: Decimal,
    #[serde(default)]
    pub percentage: Decimal,
    #[serde(default)]
    pub position: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreRider {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub nationality: String,
}

fn decimal_or_zero<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Decimal>::deserialize(deserializer)?.unwrap_or_default())
}

impl From<RankingRecord> for RankingEntry {
    fn from(record: RankingRecord) -> Self {
        Self {
            participant_id: record.participant_id,
            rider: record.rider,
            horse: record.horse,
            average: record.average,
            percentage: record.percentage,
            position: record.position,
            direction: RowDirection::None,
            change: PositionChange::Same,
        }
    }
}

impl StoreRankingRecord {
    fn into_entry(self, participant_id: i64) -> RankingEntry {
        let name = format!("{} {}", self.rider.first_name, self.rider.last_name)
            .trim()
            .to_string();

        RankingEntry {
            participant_id,
            rider: Rider {
                id: self.rider.id,
                name,
                nationality: self.rider.nationality,
            },
            horse: self.horse,
            average: self.average,
            percentage: self.percentage,
            position: self.position,
            direction: RowDirection::None,
            change: PositionChange::Same,
        }
    }
}

/// Parses a rankings payload from any of the three sources.
///
/// Accepts the socket envelope (`{"rankings": [...]}`), a REST page
/// (`{"count": .., "results": [...]}`), a bare array of [`RankingRecord`]s,
/// or the store's map keyed by participant id. `null` yields an empty
/// ranking. Entries come back ordered by position.
pub fn parse_rankings(payload: &Value) -> serde_json::Result<Vec<RankingEntry>> {
    let payload = payload
        .get("rankings")
        .or_else(|| payload.get("results"))
        .unwrap_or(payload);

    let mut entries: Vec<RankingEntry> = match payload {
        Value::Null => Vec::new(),
        Value::Array(_) => {
            let records: Vec<RankingRecord> = serde_json::from_value(payload.clone())?;
            records.into_iter().map(RankingEntry::from).collect()
        }
        _ => {
            let records: BTreeMap<String, StoreRankingRecord> =
                serde_json::from_value(payload.clone())?;
            records
                .into_iter()
                .filter_map(|(key, record)| {
                    key.parse::<i64>()
                        .ok()
                        .map(|participant_id| record.into_entry(participant_id))
                })
                .collect()
        }
    };

    entries.sort_by_key(|entry| entry.position);
    Ok(entries)
}
