use deadpool_postgres::GenericClient;

/// Moves the `id` bigserial sequence of a table back to `max(id) + 1` after rows were deleted by a rollback, so the next
/// block reuses contiguous ids.
pub async fn pg_reset_table_sequence<T: GenericClient>(
    table: &str,
    client: &T,
) -> Result<(), String> {
    client
        .query(
            &format!(
                "SELECT setval(pg_get_serial_sequence('{table}', 'id'), COALESCE(MAX(id), 0) + 1, false) FROM {table}"
            ),
            &[],
        )
        .await
        .map_err(|e| format!("pg_reset_table_sequence {table}: {e}"))?;
    Ok(())
}
