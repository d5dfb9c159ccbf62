use chrono::{DateTime, TimeZone, Utc};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::sqlite::{SqliteArgumentValue, SqliteTypeInfo, SqliteValueRef};
use sqlx::{Decode, Encode, Sqlite, Type};

/// UTC instant stored as INTEGER unix milliseconds.
///  Keeps comparisons in SQL (`expires_at <= ?`) plain integer math.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DTimestamp(DateTime<Utc>);

impl DTimestamp {
    pub fn millis(&self) -> i64 {
        self.0.timestamp_millis()
    }
}

impl From<DateTime<Utc>> for DTimestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value)
    }
}

impl From<DTimestamp> for DateTime<Utc> {
    fn from(value: DTimestamp) -> Self {
        value.0
    }
}

impl Decode<'_, Sqlite> for DTimestamp {
    fn decode(value: SqliteValueRef<'_>) -> Result<Self, BoxDynError> {
        let millis = <i64 as Decode<Sqlite>>::decode(value)?;
        let at = Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| format!("timestamp out of range: {}", millis))?;
        Ok(Self(at))
    }
}

impl Encode<'_, Sqlite> for DTimestamp {
    fn encode_by_ref(
        &self,
        args: &mut Vec<SqliteArgumentValue<'_>>,
    ) -> Result<IsNull, BoxDynError> {
        args.push(SqliteArgumentValue::Int64(self.millis()));
        Ok(IsNull::No)
    }
}

impl Type<Sqlite> for DTimestamp {
    fn compatible(ty: &SqliteTypeInfo) -> bool {
        <i64 as Type<Sqlite>>::compatible(ty)
    }

    fn type_info() -> SqliteTypeInfo {
        <i64 as Type<Sqlite>>::type_info()
    }
}
