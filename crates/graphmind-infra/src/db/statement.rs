//! Parameterised statements forwarded verbatim to the backend.

use chrono::{DateTime, Utc};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::types::Oid;
use sqlx::postgres::{PgArgumentBuffer, PgArguments, PgRow, PgTypeInfo};
use sqlx::{Arguments, Encode, Executor, FromRow, Postgres, Type};

use crate::error::{InfraError, InfraResult};

/// A single positional parameter.
///
/// `Null` is sent without a declared type, so the server infers it from the
/// statement. `Text` is sent as `text`; compare it with other column types
/// through an explicit cast such as `$n::uuid`. `Vector` binds as `real[]`;
/// pgvector statements cast it with `$n::real[]::vector`.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Json(serde_json::Value),
    Timestamp(DateTime<Utc>),
    Bytes(Vec<u8>),
    Vector(Vec<f32>),
}

macro_rules! impl_from_param {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for SqlParam {
                fn from(value: $ty) -> Self {
                    SqlParam::$variant(value.into())
                }
            }
        )*
    };
}

impl_from_param!(
    bool => Bool,
    i32 => Int,
    i64 => Int,
    f64 => Float,
    String => Text,
    &str => Text,
    serde_json::Value => Json,
    DateTime<Utc> => Timestamp,
    Vec<u8> => Bytes,
    Vec<f32> => Vector,
);

impl<T: Into<SqlParam>> From<Option<T>> for SqlParam {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(SqlParam::Null)
    }
}

/// NULL with OID 0, leaving the parameter type to the server.
struct UntypedNull;

impl Type<Postgres> for UntypedNull {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_oid(Oid(0))
    }
}

impl Encode<'_, Postgres> for UntypedNull {
    fn encode_by_ref(&self, _buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        Ok(IsNull::Yes)
    }
}

/// SQL text plus ordered parameters. The text is not interpreted.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub text: String,
    pub params: Vec<SqlParam>,
}

impl Statement {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: Vec::new(),
        }
    }

    /// Appends the next positional parameter.
    pub fn bind(mut self, param: impl Into<SqlParam>) -> Self {
        self.params.push(param.into());
        self
    }

    pub(crate) fn arguments(&self) -> InfraResult<PgArguments> {
        let mut args = PgArguments::default();
        for (index, param) in self.params.iter().enumerate() {
            let added = match param {
                SqlParam::Null => args.add(UntypedNull),
                SqlParam::Bool(v) => args.add(*v),
                SqlParam::Int(v) => args.add(*v),
                SqlParam::Float(v) => args.add(*v),
                SqlParam::Text(v) => args.add(v.clone()),
                SqlParam::Json(v) => args.add(v.clone()),
                SqlParam::Timestamp(v) => args.add(*v),
                SqlParam::Bytes(v) => args.add(v.clone()),
                SqlParam::Vector(v) => args.add(v.clone()),
            };
            added.map_err(|e| InfraError::InvalidInput {
                message: format!("cannot bind parameter ${}: {e}", index + 1),
            })?;
        }
        Ok(args)
    }

    /// Runs the statement and decodes every returned row.
    ///
    /// Accepts a pool or a connection borrowed inside a transaction.
    pub async fn fetch_all<'c, T, E>(&self, executor: E) -> InfraResult<Vec<T>>
    where
        E: Executor<'c, Database = Postgres>,
        T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        let rows = sqlx::query_as_with::<Postgres, T, _>(&self.text, self.arguments()?)
            .fetch_all(executor)
            .await?;
        Ok(rows)
    }

    /// Runs the statement and returns the number of affected rows.
    pub async fn execute<'c, E>(&self, executor: E) -> InfraResult<u64>
    where
        E: Executor<'c, Database = Postgres>,
    {
        let result = sqlx::query_with::<Postgres, _>(&self.text, self.arguments()?)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }
}
