use actix_web::{web, App, HttpResponse, HttpServer};
use serde_json::json;

mod auth;
mod books;
mod config;
mod db;
mod error;
mod models;
mod users;

use config::AppConfig;

async fn route_not_found() -> HttpResponse {
    HttpResponse::NotFound().json(json!({"success": false, "message": "route not found"}))
}

/// Malformed or non-JSON bodies get the same envelope as every other failure.
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        actix_web::error::InternalError::from_response(
            err,
            HttpResponse::BadRequest()
                .json(json!({"success": false, "message": "malformed request body"})),
        )
        .into()
    })
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();

    let config = AppConfig::from_env();
    let database = db::connect(&config.database_url).await;
    db::ensure_indexes(&database)
        .await
        .expect("failed to create indexes");

    let user_collection = db::users(&database);
    let book_collection = db::books(&database);
    let port = config.port;
    log::info!("listening on port {}", port);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(config.clone()))
            .app_data(web::Data::new(user_collection.clone()))
            .app_data(web::Data::new(book_collection.clone()))
            .app_data(json_config())
            // accounts
            .route("/users", web::post().to(users::register))
            .route("/users/login", web::post().to(users::login))
            .route("/users/logout", web::delete().to(users::logout))
            .route("/users/extend", web::patch().to(users::extend))
            .route("/users/me", web::get().to(users::profile))
            // favorites and cart
            .route("/users/favorite", web::post().to(users::toggle_favorite))
            .route("/users/favorite", web::get().to(users::favorite_status))
            .route("/users/cart", web::patch().to(users::edit_cart))
            .route("/users/cart", web::get().to(users::get_cart))
            // catalog; /books/all must register before /books/{id}
            .route("/books/all", web::get().to(books::get_all))
            .route("/books", web::get().to(books::list))
            .route("/books", web::post().to(books::create))
            .route("/books/{id}", web::get().to(books::get))
            .route("/books/{id}", web::delete().to(books::delete_book))
            .route("/books/{id}", web::patch().to(books::edit_book))
            // reviews
            .route("/books/{id}/reviews", web::post().to(books::add_review))
            .route(
                "/books/{book_id}/reviews/{review_id}",
                web::patch().to(books::edit_review),
            )
            .default_service(web::route().to(route_not_found))
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
