use mongodb::{Database, IndexModel, options::IndexOptions};
use tracing::info;

use crate::models::{CameraConnection, StreamStatus};

pub async fn ensure_indexes(db: &Database) -> Result<(), mongodb::error::Error> {
    // Camera connections: listed per event, swept by staleness
    create_indexes(
        db,
        CameraConnection::COLLECTION,
        vec![
            index(bson::doc! { "event_id": 1, "joined_at": -1 }),
            index(bson::doc! { "status": 1, "last_active_at": 1 }),
            index(bson::doc! { "event_id": 1, "participant_id": 1 }),
        ],
    )
    .await?;

    // One status document per event; the unique key backs the revision check
    create_indexes(
        db,
        StreamStatus::COLLECTION,
        vec![
            index_unique(bson::doc! { "event_id": 1 }),
            index(bson::doc! { "is_live": 1 }),
        ],
    )
    .await?;

    info!("All indexes ensured");
    Ok(())
}

fn index(keys: bson::Document) -> IndexModel {
    IndexModel::builder().keys(keys).build()
}

fn index_unique(keys: bson::Document) -> IndexModel {
    IndexModel::builder()
        .keys(keys)
        .options(IndexOptions::builder().unique(true).build())
        .build()
}

async fn create_indexes(
    db: &Database,
    collection: &str,
    indexes: Vec<IndexModel>,
) -> Result<(), mongodb::error::Error> {
    db.collection::<bson::Document>(collection)
        .create_indexes(indexes)
        .await?;
    info!(collection, "Indexes created");
    Ok(())
}
