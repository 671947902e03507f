use mongodb::bson::doc;
use mongodb::options::{ClientOptions, IndexOptions};
use mongodb::{Client, Collection, Database, IndexModel};

use crate::models::{Book, User};

pub async fn connect(database_url: &str) -> Database {
    let client_options = ClientOptions::parse(database_url)
        .await
        .expect("failed to parse MongoDB connection string");

    let client = Client::with_options(client_options).expect("failed to initialize MongoDB client");

    client.database("bookshelf")
}

pub fn users(db: &Database) -> Collection<User> {
    db.collection::<User>("users")
}

pub fn books(db: &Database) -> Collection<Book> {
    db.collection::<Book>("books")
}

/// Unique indexes backing the pre-insert duplicate checks: account and email
/// on users, title on books. A violation surfaces as a duplicate-key write
/// error and is mapped to a conflict response.
pub async fn ensure_indexes(db: &Database) -> mongodb::error::Result<()> {
    let unique = || IndexOptions::builder().unique(true).build();

    users(db)
        .create_index(
            IndexModel::builder()
                .keys(doc! {"account": 1})
                .options(unique())
                .build(),
            None,
        )
        .await?;
    users(db)
        .create_index(
            IndexModel::builder()
                .keys(doc! {"email": 1})
                .options(unique())
                .build(),
            None,
        )
        .await?;
    books(db)
        .create_index(
            IndexModel::builder()
                .keys(doc! {"title": 1})
                .options(unique())
                .build(),
            None,
        )
        .await?;

    Ok(())
}
