use chrono::{DateTime, Utc};
use prk_reconcile::{StoreError, TransactionStore};
use prk_schemas::{
    CanonicalTransaction, Parking, PaymentMethod, TxStatus, UseType, ValidationError, VisitKey,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

const COLUMNS: &str = r#"
    id, parking_id, parking_name, parking_slug, sequence, matricula,
    checkin_at, checkout_at, payment_at, occupied_buckets, duration_units,
    fare_amount_micros, paid_amount_micros, discount_micros, fare_name,
    use_type, offer_type, category, payment_method, status, is_valid,
    version, schema_version, created_at, updated_at, deleted_at
"#;

/// PostgreSQL-backed store. Cloning shares the pool.
#[derive(Debug, Clone)]
pub struct PgTransactionStore {
    pool: PgPool,
}

impl PgTransactionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn unavailable(op: &str, e: sqlx::Error) -> StoreError {
    StoreError::Unavailable(format!("{op} failed: {e}"))
}

/// Check violations mean the row itself is bad, not the connection.
fn classify_write_error(op: &str, e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.code().as_deref() == Some("23514") {
            return StoreError::Validation(ValidationError::single(format!(
                "{op} rejected by constraint: {}",
                db_err.message()
            )));
        }
    }
    unavailable(op, e)
}

fn tx_from_row(row: &PgRow) -> Result<CanonicalTransaction, StoreError> {
    let get = |e: sqlx::Error| unavailable("decode transaction row", e);

    let method_label: String = row.try_get("payment_method").map_err(get)?;
    let payment_method = PaymentMethod::from_label(&method_label).ok_or_else(|| {
        StoreError::Validation(ValidationError::single(format!(
            "stored payment_method '{method_label}' is not canonical"
        )))
    })?;
    let status_label: String = row.try_get("status").map_err(get)?;
    let status = TxStatus::parse(&status_label).ok_or_else(|| {
        StoreError::Validation(ValidationError::single(format!(
            "stored status '{status_label}' is not canonical"
        )))
    })?;
    let use_type: String = row.try_get("use_type").map_err(get)?;

    Ok(CanonicalTransaction {
        id: Some(row.try_get::<Uuid, _>("id").map_err(get)?),
        parking: Parking {
            id: row.try_get("parking_id").map_err(get)?,
            name: row.try_get("parking_name").map_err(get)?,
            slug: row.try_get("parking_slug").map_err(get)?,
        },
        sequence: row.try_get("sequence").map_err(get)?,
        matricula: row.try_get("matricula").map_err(get)?,
        checkin_at: row.try_get("checkin_at").map_err(get)?,
        checkout_at: row.try_get("checkout_at").map_err(get)?,
        payment_at: row.try_get("payment_at").map_err(get)?,
        occupied_buckets: row
            .try_get::<Vec<DateTime<Utc>>, _>("occupied_buckets")
            .map_err(get)?,
        duration_units: row.try_get("duration_units").map_err(get)?,
        fare_amount_micros: row.try_get("fare_amount_micros").map_err(get)?,
        paid_amount_micros: row.try_get("paid_amount_micros").map_err(get)?,
        discount_micros: row.try_get("discount_micros").map_err(get)?,
        fare_name: row.try_get("fare_name").map_err(get)?,
        use_type: UseType::from_label(&use_type),
        offer_type: row.try_get("offer_type").map_err(get)?,
        category: row.try_get("category").map_err(get)?,
        payment_method,
        status,
        is_valid: row.try_get("is_valid").map_err(get)?,
        version: row.try_get("version").map_err(get)?,
        schema: row.try_get("schema_version").map_err(get)?,
        created_at: Some(row.try_get::<DateTime<Utc>, _>("created_at").map_err(get)?),
        updated_at: Some(row.try_get::<DateTime<Utc>, _>("updated_at").map_err(get)?),
        deleted_at: row.try_get("deleted_at").map_err(get)?,
    })
}

#[async_trait::async_trait]
impl TransactionStore for PgTransactionStore {
    async fn find_by_key(&self, key: &VisitKey) -> Result<Vec<CanonicalTransaction>, StoreError> {
        let sql = format!(
            "select {COLUMNS} from transactions
             where parking_id = $1 and sequence = $2 and matricula = $3 and deleted_at is null
             order by created_at desc, id desc"
        );
        let rows = sqlx::query(&sql)
            .bind(key.parking_id)
            .bind(&key.sequence)
            .bind(&key.matricula)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| unavailable("find_by_key", e))?;
        rows.iter().map(tx_from_row).collect()
    }

    async fn find_all_by_matricula(
        &self,
        parking_id: i64,
        matricula: &str,
    ) -> Result<Vec<CanonicalTransaction>, StoreError> {
        let sql = format!(
            "select {COLUMNS} from transactions
             where parking_id = $1 and matricula = $2 and deleted_at is null
             order by created_at desc, id desc"
        );
        let rows = sqlx::query(&sql)
            .bind(parking_id)
            .bind(matricula)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| unavailable("find_all_by_matricula", e))?;
        rows.iter().map(tx_from_row).collect()
    }

    async fn insert(&self, mut tx: CanonicalTransaction) -> Result<CanonicalTransaction, StoreError> {
        tx.validate()?;
        let now = Utc::now();
        tx.id = Some(Uuid::new_v4());
        tx.version = 1;
        tx.created_at = Some(now);
        tx.updated_at = Some(now);
        tx.deleted_at = None;

        sqlx::query(
            r#"
            insert into transactions (
              id, parking_id, parking_name, parking_slug, sequence, matricula,
              checkin_at, checkout_at, payment_at, occupied_buckets, duration_units,
              fare_amount_micros, paid_amount_micros, discount_micros, fare_name,
              use_type, offer_type, category, payment_method, status, is_valid,
              version, schema_version, created_at, updated_at
            ) values (
              $1, $2, $3, $4, $5, $6,
              $7, $8, $9, $10, $11,
              $12, $13, $14, $15,
              $16, $17, $18, $19, $20, $21,
              $22, $23, $24, $25
            )
            "#,
        )
        .bind(tx.id)
        .bind(tx.parking.id)
        .bind(&tx.parking.name)
        .bind(&tx.parking.slug)
        .bind(&tx.sequence)
        .bind(&tx.matricula)
        .bind(tx.checkin_at)
        .bind(tx.checkout_at)
        .bind(tx.payment_at)
        .bind(&tx.occupied_buckets)
        .bind(tx.duration_units)
        .bind(tx.fare_amount_micros)
        .bind(tx.paid_amount_micros)
        .bind(tx.discount_micros)
        .bind(&tx.fare_name)
        .bind(tx.use_type.as_str())
        .bind(&tx.offer_type)
        .bind(&tx.category)
        .bind(tx.payment_method.as_str())
        .bind(tx.status.as_str())
        .bind(tx.is_valid)
        .bind(tx.version)
        .bind(tx.schema)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| classify_write_error("insert", e))?;

        Ok(tx)
    }

    async fn update_versioned(
        &self,
        mut tx: CanonicalTransaction,
        expected_version: i64,
    ) -> Result<CanonicalTransaction, StoreError> {
        let id = tx
            .id
            .ok_or_else(|| StoreError::Validation(ValidationError::single("update without id")))?;
        tx.validate()?;
        let now = Utc::now();

        let res = sqlx::query(
            r#"
            update transactions set
              parking_name = $3, parking_slug = $4, sequence = $5, matricula = $6,
              checkin_at = $7, checkout_at = $8, payment_at = $9,
              occupied_buckets = $10, duration_units = $11,
              fare_amount_micros = $12, paid_amount_micros = $13, discount_micros = $14,
              fare_name = $15, use_type = $16, offer_type = $17, category = $18,
              payment_method = $19, status = $20, is_valid = $21,
              schema_version = $22, updated_at = $23,
              version = version + 1
            where id = $1 and version = $2 and deleted_at is null
            "#,
        )
        .bind(id)
        .bind(expected_version)
        .bind(&tx.parking.name)
        .bind(&tx.parking.slug)
        .bind(&tx.sequence)
        .bind(&tx.matricula)
        .bind(tx.checkin_at)
        .bind(tx.checkout_at)
        .bind(tx.payment_at)
        .bind(&tx.occupied_buckets)
        .bind(tx.duration_units)
        .bind(tx.fare_amount_micros)
        .bind(tx.paid_amount_micros)
        .bind(tx.discount_micros)
        .bind(&tx.fare_name)
        .bind(tx.use_type.as_str())
        .bind(&tx.offer_type)
        .bind(&tx.category)
        .bind(tx.payment_method.as_str())
        .bind(tx.status.as_str())
        .bind(tx.is_valid)
        .bind(tx.schema)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| classify_write_error("update_versioned", e))?;

        if res.rows_affected() == 0 {
            return Err(StoreError::Conflict {
                id,
                expected_version,
            });
        }

        tx.version = expected_version + 1;
        tx.updated_at = Some(now);
        Ok(tx)
    }

    async fn get(&self, id: Uuid) -> Result<Option<CanonicalTransaction>, StoreError> {
        let sql = format!("select {COLUMNS} from transactions where id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| unavailable("get", e))?;
        row.as_ref().map(tx_from_row).transpose()
    }

    async fn soft_delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let res = sqlx::query(
            r#"
            update transactions
            set deleted_at = now(), updated_at = now(), version = version + 1
            where id = $1 and deleted_at is null
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| unavailable("soft_delete", e))?;
        Ok(res.rows_affected() > 0)
    }
}
