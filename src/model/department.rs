use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Work window of a department. Times are same-day wall-clock times in the
/// department's time zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    #[serde(with = "hhmm")]
    #[schema(value_type = String, example = "09:00")]
    pub clock_in: NaiveTime,

    #[serde(with = "hhmm")]
    #[schema(value_type = String, example = "18:00")]
    pub clock_out: NaiveTime,

    /// Minutes after the scheduled start before a clock-in counts as late.
    #[schema(example = 15)]
    pub grace_period: u32,

    /// Minutes after the scheduled end before continued work is overtime.
    #[schema(example = 30)]
    pub overtime_threshold: u32,
}

impl Schedule {
    pub fn validate(&self) -> Result<(), String> {
        if self.clock_in >= self.clock_out {
            return Err(format!(
                "clockIn ({}) must be earlier than clockOut ({}); overnight shifts are not supported",
                self.clock_in.format("%H:%M"),
                self.clock_out.format("%H:%M")
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Department {
    #[serde(default)]
    #[schema(example = "2b0c6d1e-6c55-4b0e-9d61-0a4b5c1f7e11")]
    pub id: String,

    #[schema(example = "Support")]
    pub name: String,

    /// IANA zone name. Unknown names are treated as UTC.
    #[schema(example = "America/New_York")]
    pub timezone: String,

    pub schedule: Schedule,
}

mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    const FORMAT: &str = "%H:%M";

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(raw.trim(), FORMAT).map_err(D::Error::custom)
    }
}
