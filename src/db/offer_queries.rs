use sqlx::PgPool;
use uuid::Uuid;

/// Point the offer at its freshly uploaded artifact.
///
/// Only legitimate writer of `offers.pdf_url`; runs before the quota
/// increments so a failed quota check can undo it cheaply.
pub async fn set_offer_pdf_url(
    pool: &PgPool,
    offer_id: Uuid,
    pdf_url: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE offers SET pdf_url = $2 WHERE id = $1")
        .bind(offer_id)
        .bind(pdf_url)
        .execute(pool)
        .await?;

    Ok(())
}

/// Compensating update: detach the artifact from the offer again.
pub async fn clear_offer_pdf_url(pool: &PgPool, offer_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE offers SET pdf_url = NULL WHERE id = $1")
        .bind(offer_id)
        .execute(pool)
        .await?;

    Ok(())
}
