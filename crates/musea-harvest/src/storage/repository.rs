//! SQLite metadata repository

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use super::ArtworkRepository;
use crate::error::Result;
use crate::model::{ImageReference, NormalizedArtwork};

pub struct SqliteArtworkRepository {
    pool: SqlitePool,
}

impl SqliteArtworkRepository {
    /// Connect to a `sqlite:` URL, creating the database if needed, and run
    /// migrations
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        Self::connect_with(options).await
    }

    /// Open (or create) a database file
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        Self::connect_with(options).await
    }

    async fn connect_with(options: SqliteConnectOptions) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Artwork repository ready");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn json_list(items: &[String]) -> Result<String> {
    Ok(serde_json::to_string(items)?)
}

fn image_ref(reference: Option<&ImageReference>) -> Option<String> {
    reference.map(|r| match r {
        ImageReference::Url(url) => url.clone(),
        ImageReference::IiifId(id) => format!("iiif:{}", id),
    })
}

#[async_trait]
impl ArtworkRepository for SqliteArtworkRepository {
    async fn upsert_artwork(
        &self,
        record: &NormalizedArtwork,
        museum_code: &str,
        image_path: &Path,
        checksum: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO artworks (
                museum_code, original_id, accession_number, title, artist, artist_display,
                artist_bio, artist_nationality, artist_birth_year, artist_death_year,
                date_display, date_start, date_end, medium, dimensions,
                height_cm, width_cm, depth_cm, diameter_cm,
                department, artwork_type, culture, is_public_domain, credit_line,
                is_on_view, is_highlight, description, short_description, provenance,
                inscriptions, fun_fact, keywords, colorfulness, color_h, color_s, color_l,
                image_ref, image_path, image_sha256
            )
            VALUES (
                ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
                ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
            )
            ON CONFLICT(museum_code, original_id) DO UPDATE SET
                accession_number = excluded.accession_number,
                title = excluded.title,
                artist = excluded.artist,
                artist_display = excluded.artist_display,
                artist_bio = excluded.artist_bio,
                artist_nationality = excluded.artist_nationality,
                artist_birth_year = excluded.artist_birth_year,
                artist_death_year = excluded.artist_death_year,
                date_display = excluded.date_display,
                date_start = excluded.date_start,
                date_end = excluded.date_end,
                medium = excluded.medium,
                dimensions = excluded.dimensions,
                height_cm = excluded.height_cm,
                width_cm = excluded.width_cm,
                depth_cm = excluded.depth_cm,
                diameter_cm = excluded.diameter_cm,
                department = excluded.department,
                artwork_type = excluded.artwork_type,
                culture = excluded.culture,
                is_public_domain = excluded.is_public_domain,
                credit_line = excluded.credit_line,
                is_on_view = excluded.is_on_view,
                is_highlight = excluded.is_highlight,
                description = excluded.description,
                short_description = excluded.short_description,
                provenance = excluded.provenance,
                inscriptions = excluded.inscriptions,
                fun_fact = excluded.fun_fact,
                keywords = excluded.keywords,
                colorfulness = excluded.colorfulness,
                color_h = excluded.color_h,
                color_s = excluded.color_s,
                color_l = excluded.color_l,
                image_ref = excluded.image_ref,
                image_path = excluded.image_path,
                image_sha256 = excluded.image_sha256,
                updated_at = datetime('now')
            "#,
        )
        .bind(museum_code)
        .bind(&record.id)
        .bind(&record.accession_number)
        .bind(&record.title)
        .bind(&record.artist)
        .bind(&record.artist_display)
        .bind(&record.artist_bio)
        .bind(&record.artist_nationality)
        .bind(record.artist_birth_year)
        .bind(record.artist_death_year)
        .bind(&record.date_display)
        .bind(record.date_start)
        .bind(record.date_end)
        .bind(&record.medium)
        .bind(&record.dimensions)
        .bind(record.height_cm)
        .bind(record.width_cm)
        .bind(record.depth_cm)
        .bind(record.diameter_cm)
        .bind(&record.department)
        .bind(&record.artwork_type)
        .bind(json_list(&record.culture)?)
        .bind(record.is_public_domain)
        .bind(&record.credit_line)
        .bind(record.is_on_view)
        .bind(record.is_highlight)
        .bind(&record.description)
        .bind(&record.short_description)
        .bind(&record.provenance)
        .bind(json_list(&record.inscriptions)?)
        .bind(&record.fun_fact)
        .bind(json_list(&record.keywords)?)
        .bind(record.colorfulness)
        .bind(record.color_h)
        .bind(record.color_s)
        .bind(record.color_l)
        .bind(image_ref(record.image.as_ref()))
        .bind(image_path.to_string_lossy().to_string())
        .bind(checksum)
        .execute(&self.pool)
        .await?;

        debug!(museum = museum_code, id = %record.id, "Upserted artwork");
        Ok(())
    }

    async fn exists(&self, museum_code: &str, original_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM artworks WHERE museum_code = ?1 AND original_id = ?2",
        )
        .bind(museum_code)
        .bind(original_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    async fn count(&self, museum_code: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM artworks WHERE museum_code = ?1")
            .bind(museum_code)
            .fetch_one(&self.pool)
            .await?;

        Ok(count.max(0) as u64)
    }

    async fn delete_source(&self, museum_code: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM artworks WHERE museum_code = ?1")
            .bind(museum_code)
            .execute(&self.pool)
            .await?;

        info!(museum = museum_code, removed = result.rows_affected(), "Deleted artworks");
        Ok(result.rows_affected())
    }

    async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM artworks").execute(&self.pool).await?;

        info!(removed = result.rows_affected(), "Cleared artwork repository");
        Ok(result.rows_affected())
    }
}
