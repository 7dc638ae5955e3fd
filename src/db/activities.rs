use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension};

use super::types::{coordinate_text, decimal_column};
use super::*;

/// Maximum number of photo slots on a recce row.
pub const MAX_PHOTOS: usize = 4;

const RECCE_COLUMNS: &str = "id, promoter_id, plan_id, visit_date, latitude, longitude, location,
    landmark, state, district, sub_district, village, village_code, wall_code, product_type,
    width, height, area, photo_1, photo_2, photo_3, photo_4, remarks, status, local_id,
    device_id, created_at, updated_at";

/// A recce row reduced to what the photo gallery shows.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbReccePhotos {
    pub activity_id: i64,
    pub promoter_id: i64,
    pub state: Option<String>,
    pub district: Option<String>,
    pub location: String,
    pub visit_date: String,
    pub photos: Vec<String>,
}

/// Bound values for the 23 writable columns, in `promoter_id .. device_id`
/// order, followed by the timestamp.
fn write_values(w: &ActivityRecceWrite, now: &str) -> Vec<Value> {
    let photo = |i: usize| Value::from(w.photos.get(i).cloned());
    vec![
        Value::Integer(w.promoter_id),
        Value::Integer(w.plan_id),
        Value::Text(w.visit_date.clone()),
        Value::Text(coordinate_text(w.latitude)),
        Value::Text(coordinate_text(w.longitude)),
        Value::Text(w.location.clone()),
        Value::from(w.landmark.clone()),
        Value::from(w.state.clone()),
        Value::from(w.district.clone()),
        Value::from(w.sub_district.clone()),
        Value::from(w.village.clone()),
        Value::from(w.village_code.clone()),
        Value::from(w.product_type.clone()),
        Value::Real(w.width),
        Value::Real(w.height),
        Value::Real(w.width * w.height),
        photo(0),
        photo(1),
        photo(2),
        photo(3),
        Value::from(w.remarks.clone()),
        Value::from(w.local_id.clone()),
        Value::from(w.device_id.clone()),
        Value::Text(now.to_string()),
    ]
}

impl FieldDb {
    /// Primary dedup key: (promoter_id, local_id).
    pub fn find_recce_id_by_local_id(
        &self,
        promoter_id: i64,
        local_id: &str,
    ) -> Result<Option<i64>, DbError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id FROM activity_recces WHERE promoter_id = ?1 AND local_id = ?2",
                params![promoter_id, local_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Secondary dedup key: (promoter_id, visit_date, location, latitude, longitude).
    /// Coordinates compare as canonical 7-decimal text.
    pub fn find_recce_id_by_secondary_key(
        &self,
        promoter_id: i64,
        visit_date: &str,
        location: &str,
        latitude: rust_decimal::Decimal,
        longitude: rust_decimal::Decimal,
    ) -> Result<Option<i64>, DbError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id FROM activity_recces
                 WHERE promoter_id = ?1 AND visit_date = ?2 AND location = ?3
                   AND latitude = ?4 AND longitude = ?5
                 ORDER BY id LIMIT 1",
                params![
                    promoter_id,
                    visit_date,
                    location,
                    coordinate_text(latitude),
                    coordinate_text(longitude),
                ],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Atomic insert-or-update on the (promoter_id, local_id) unique index.
    /// New rows start `pending`; an update keeps the row's current status.
    pub fn upsert_recce_by_local_id(&self, w: &ActivityRecceWrite) -> Result<i64, DbError> {
        let id = self.conn.query_row(
            "INSERT INTO activity_recces (
                promoter_id, plan_id, visit_date, latitude, longitude, location, landmark,
                state, district, sub_district, village, village_code, product_type,
                width, height, area, photo_1, photo_2, photo_3, photo_4, remarks,
                local_id, device_id, status, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                       ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, 'pending', ?24, ?24)
             ON CONFLICT(promoter_id, local_id) DO UPDATE SET
                plan_id = excluded.plan_id,
                visit_date = excluded.visit_date,
                latitude = excluded.latitude,
                longitude = excluded.longitude,
                location = excluded.location,
                landmark = excluded.landmark,
                state = excluded.state,
                district = excluded.district,
                sub_district = excluded.sub_district,
                village = excluded.village,
                village_code = excluded.village_code,
                product_type = excluded.product_type,
                width = excluded.width,
                height = excluded.height,
                area = excluded.area,
                photo_1 = excluded.photo_1,
                photo_2 = excluded.photo_2,
                photo_3 = excluded.photo_3,
                photo_4 = excluded.photo_4,
                remarks = excluded.remarks,
                device_id = excluded.device_id,
                updated_at = excluded.updated_at
             RETURNING id",
            params_from_iter(write_values(w, &now_rfc3339())),
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Plain insert with status `pending`.
    pub fn insert_recce(&self, w: &ActivityRecceWrite) -> Result<i64, DbError> {
        self.conn.execute(
            "INSERT INTO activity_recces (
                promoter_id, plan_id, visit_date, latitude, longitude, location, landmark,
                state, district, sub_district, village, village_code, product_type,
                width, height, area, photo_1, photo_2, photo_3, photo_4, remarks,
                local_id, device_id, status, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                       ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, 'pending', ?24, ?24)",
            params_from_iter(write_values(w, &now_rfc3339())),
        )?;
        Ok(self.last_insert_id())
    }

    /// Overwrite every writable column of an existing row. Status is untouched;
    /// a missing `local_id` or `device_id` keeps the stored one.
    pub fn update_recce(&self, id: i64, w: &ActivityRecceWrite) -> Result<bool, DbError> {
        let mut values = write_values(w, &now_rfc3339());
        values.push(Value::Integer(id));
        let changed = self.conn.execute(
            "UPDATE activity_recces SET
                promoter_id = ?1, plan_id = ?2, visit_date = ?3, latitude = ?4, longitude = ?5,
                location = ?6, landmark = ?7, state = ?8, district = ?9, sub_district = ?10,
                village = ?11, village_code = ?12, product_type = ?13, width = ?14,
                height = ?15, area = ?16, photo_1 = ?17, photo_2 = ?18, photo_3 = ?19,
                photo_4 = ?20, remarks = ?21, local_id = COALESCE(?22, local_id),
                device_id = COALESCE(?23, device_id),
                updated_at = ?24
             WHERE id = ?25",
            params_from_iter(values),
        )?;
        Ok(changed > 0)
    }

    pub fn set_recce_wall_code(&self, id: i64, wall_code: Option<&str>) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE activity_recces SET wall_code = ?2 WHERE id = ?1",
            params![id, wall_code],
        )?;
        Ok(())
    }

    pub fn get_recce(&self, id: i64) -> Result<Option<DbActivityRecce>, DbError> {
        let sql = format!("SELECT {RECCE_COLUMNS} FROM activity_recces WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![id], Self::map_recce_row)
            .optional()?)
    }

    /// Fetch a recce by id, restricted by `filter` (state scope).
    pub fn get_recce_filtered(
        &self,
        id: i64,
        filter: &SqlFilter,
    ) -> Result<Option<DbActivityRecce>, DbError> {
        let mut scoped = filter.clone();
        scoped.push("id = ?", [Value::Integer(id)]);
        let sql = format!(
            "SELECT {RECCE_COLUMNS} FROM activity_recces{}",
            scoped.where_sql()
        );
        Ok(self
            .conn
            .query_row(&sql, params_from_iter(scoped.params()), Self::map_recce_row)
            .optional()?)
    }

    /// Page through recces matching `filter`, most recent visit first.
    pub fn list_recces(
        &self,
        filter: &SqlFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DbActivityRecce>, DbError> {
        let sql = format!(
            "SELECT {RECCE_COLUMNS} FROM activity_recces{}
             ORDER BY visit_date DESC, id DESC LIMIT ? OFFSET ?",
            filter.where_sql()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params_from_iter(filter.params_with([Value::Integer(limit), Value::Integer(offset)])),
            Self::map_recce_row,
        )?;
        collect_rows(rows)
    }

    pub fn count_recces(&self, filter: &SqlFilter) -> Result<i64, DbError> {
        let sql = format!("SELECT COUNT(*) FROM activity_recces{}", filter.where_sql());
        Ok(self
            .conn
            .query_row(&sql, params_from_iter(filter.params()), |row| row.get(0))?)
    }

    /// Recces with at least one photo, for the gallery.
    pub fn list_recce_photos(
        &self,
        filter: &SqlFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DbReccePhotos>, DbError> {
        let mut scoped = filter.clone();
        scoped.push(
            "(photo_1 IS NOT NULL OR photo_2 IS NOT NULL OR photo_3 IS NOT NULL OR photo_4 IS NOT NULL)",
            std::iter::empty(),
        );
        let sql = format!(
            "SELECT id, promoter_id, state, district, location, visit_date,
                    photo_1, photo_2, photo_3, photo_4
             FROM activity_recces{}
             ORDER BY visit_date DESC, id DESC LIMIT ? OFFSET ?",
            scoped.where_sql()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params_from_iter(scoped.params_with([Value::Integer(limit), Value::Integer(offset)])),
            |row| {
                Ok(DbReccePhotos {
                    activity_id: row.get(0)?,
                    promoter_id: row.get(1)?,
                    state: row.get(2)?,
                    district: row.get(3)?,
                    location: row.get(4)?,
                    visit_date: row.get(5)?,
                    photos: photo_columns(row, 6)?,
                })
            },
        )?;
        collect_rows(rows)
    }

    pub fn update_recce_status(
        &self,
        id: i64,
        status: &str,
        remarks: Option<&str>,
    ) -> Result<bool, DbError> {
        let changed = self.conn.execute(
            "UPDATE activity_recces
             SET status = ?2, remarks = COALESCE(?3, remarks), updated_at = ?4
             WHERE id = ?1",
            params![id, status, remarks, now_rfc3339()],
        )?;
        Ok(changed > 0)
    }

    pub fn delete_recce(&self, id: i64) -> Result<bool, DbError> {
        let changed = self
            .conn
            .execute("DELETE FROM activity_recces WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    fn map_recce_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbActivityRecce> {
        Ok(DbActivityRecce {
            id: row.get(0)?,
            promoter_id: row.get(1)?,
            plan_id: row.get(2)?,
            visit_date: row.get(3)?,
            latitude: decimal_column(row, 4)?,
            longitude: decimal_column(row, 5)?,
            location: row.get(6)?,
            landmark: row.get(7)?,
            state: row.get(8)?,
            district: row.get(9)?,
            sub_district: row.get(10)?,
            village: row.get(11)?,
            village_code: row.get(12)?,
            wall_code: row.get(13)?,
            product_type: row.get(14)?,
            width: row.get(15)?,
            height: row.get(16)?,
            area: row.get(17)?,
            photos: photo_columns(row, 18)?,
            remarks: row.get(22)?,
            status: row.get(23)?,
            local_id: row.get(24)?,
            device_id: row.get(25)?,
            created_at: row.get(26)?,
            updated_at: row.get(27)?,
        })
    }
}

/// Read the four consecutive photo slots starting at `first`, skipping empties.
fn photo_columns(row: &rusqlite::Row<'_>, first: usize) -> rusqlite::Result<Vec<String>> {
    let mut photos = Vec::with_capacity(MAX_PHOTOS);
    for idx in first..first + MAX_PHOTOS {
        if let Some(url) = row.get::<_, Option<String>>(idx)? {
            if !url.trim().is_empty() {
                photos.push(url);
            }
        }
    }
    Ok(photos)
}
