use actix_web::{web, HttpResponse};
use argon2::Config as ArgonConfig;
use futures::stream::StreamExt;
use mongodb::bson::{doc, oid::ObjectId, to_bson, DateTime};
use mongodb::Collection;
use rand::Rng;
use serde_json::json;
use std::collections::HashMap;

use crate::auth::{sign_token, Identity};
use crate::books::book_summary;
use crate::config::AppConfig;
use crate::error::ApiError;
use crate::models::{
    parse_object_id, roles, validate_register, Book, CartEdit, CartInput, FavoriteInput,
    LoginInput, RegisterInput, User,
};

/// Loads the authenticated user and checks the presented token is still in
/// the active token list (it may have been removed by logout).
pub async fn load_session(
    users: &Collection<User>,
    ident: &Identity,
) -> Result<User, ApiError> {
    let user = users
        .find_one(doc! {"_id": ident.user_id}, None)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("login required".to_string()))?;

    if !user.tokens.iter().any(|token| token == &ident.token) {
        return Err(ApiError::Unauthorized("login expired".to_string()));
    }

    Ok(user)
}

pub fn require_admin(user: &User) -> Result<(), ApiError> {
    if user.role == roles::ADMIN {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt: [u8; 16] = rand::thread_rng().gen();
    argon2::hash_encoded(password.as_bytes(), &salt, &ArgonConfig::default())
        .map_err(|err| ApiError::Internal(format!("password hashing failed: {err}")))
}

pub async fn register(
    users: web::Data<Collection<User>>,
    body: web::Json<RegisterInput>,
) -> Result<HttpResponse, ApiError> {
    validate_register(&body)?;

    // Pre-insert check; the unique indexes catch the race as a fallback.
    let existing = users
        .find_one(
            doc! {"$or": [{"account": &body.account}, {"email": &body.email}]},
            None,
        )
        .await?;
    if existing.is_some() {
        return Err(ApiError::Conflict(
            "account or email already registered".to_string(),
        ));
    }

    let now = DateTime::now();
    let user = User {
        id: ObjectId::new(),
        account: body.account.clone(),
        email: body.email.clone(),
        password: hash_password(&body.password)?,
        tokens: Vec::new(),
        role: roles::USER,
        favorite: Vec::new(),
        cart: Vec::new(),
        created_at: now,
        updated_at: now,
    };
    users.insert_one(&user, None).await?;

    Ok(HttpResponse::Ok().json(json!({"success": true, "message": ""})))
}

pub async fn login(
    users: web::Data<Collection<User>>,
    config: web::Data<AppConfig>,
    body: web::Json<LoginInput>,
) -> Result<HttpResponse, ApiError> {
    let user = users
        .find_one(doc! {"account": &body.account}, None)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("invalid account or password".to_string()))?;

    if !argon2::verify_encoded(&user.password, body.password.as_bytes()).unwrap_or(false) {
        return Err(ApiError::Unauthorized(
            "invalid account or password".to_string(),
        ));
    }

    let token = sign_token(&user.id, &config.jwt_secret)?;
    users
        .update_one(
            doc! {"_id": user.id},
            doc! {"$push": {"tokens": &token}, "$set": {"updatedAt": DateTime::now()}},
            None,
        )
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "",
        "result": {
            "token": token,
            "account": user.account,
            "email": user.email,
            "role": user.role,
        }
    })))
}

pub async fn logout(
    users: web::Data<Collection<User>>,
    ident: Identity,
) -> Result<HttpResponse, ApiError> {
    load_session(&users, &ident).await?;

    users
        .update_one(
            doc! {"_id": ident.user_id},
            doc! {"$pull": {"tokens": &ident.token}, "$set": {"updatedAt": DateTime::now()}},
            None,
        )
        .await?;

    Ok(HttpResponse::Ok().json(json!({"success": true, "message": ""})))
}

/// Rotates the presented token in place, keeping the rest of the list intact.
pub async fn extend(
    users: web::Data<Collection<User>>,
    config: web::Data<AppConfig>,
    ident: Identity,
) -> Result<HttpResponse, ApiError> {
    let mut user = load_session(&users, &ident).await?;

    let index = user
        .tokens
        .iter()
        .position(|token| token == &ident.token)
        .ok_or_else(|| ApiError::Unauthorized("login expired".to_string()))?;
    let token = sign_token(&user.id, &config.jwt_secret)?;
    user.tokens[index] = token.clone();

    users
        .update_one(
            doc! {"_id": user.id},
            doc! {"$set": {"tokens": to_bson(&user.tokens)?, "updatedAt": DateTime::now()}},
            None,
        )
        .await?;

    Ok(HttpResponse::Ok().json(json!({"success": true, "message": "", "result": token})))
}

pub async fn profile(
    users: web::Data<Collection<User>>,
    ident: Identity,
) -> Result<HttpResponse, ApiError> {
    let user = load_session(&users, &ident).await?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "",
        "result": {
            "account": user.account,
            "email": user.email,
            "role": user.role,
        }
    })))
}

pub async fn toggle_favorite(
    users: web::Data<Collection<User>>,
    ident: Identity,
    body: web::Json<FavoriteInput>,
) -> Result<HttpResponse, ApiError> {
    let book_id = parse_object_id(&body.book_id)?;
    let mut user = load_session(&users, &ident).await?;

    user.toggle_favorite(book_id, body.is_favorite);
    users
        .update_one(
            doc! {"_id": user.id},
            doc! {"$set": {"favorite": to_bson(&user.favorite)?, "updatedAt": DateTime::now()}},
            None,
        )
        .await?;

    let result: Vec<_> = user
        .favorite
        .iter()
        .map(|entry| json!({"book": entry.book.to_hex(), "isFavorite": entry.is_favorite}))
        .collect();
    Ok(HttpResponse::Ok().json(json!({"success": true, "message": "", "result": result})))
}

pub async fn favorite_status(
    users: web::Data<Collection<User>>,
    ident: Identity,
) -> Result<HttpResponse, ApiError> {
    let user = load_session(&users, &ident).await?;

    let result: Vec<String> = user
        .favorite_ids()
        .into_iter()
        .map(|id| id.to_hex())
        .collect();
    Ok(HttpResponse::Ok().json(json!({"success": true, "message": "", "result": result})))
}

/// Merges a quantity delta into the cart. New line items require the book to
/// exist; merged quantities of zero or below drop the line. Responds with the
/// aggregate cart quantity.
pub async fn edit_cart(
    users: web::Data<Collection<User>>,
    books: web::Data<Collection<Book>>,
    ident: Identity,
    body: web::Json<CartInput>,
) -> Result<HttpResponse, ApiError> {
    let book_id = parse_object_id(&body.book_id)?;
    let mut user = load_session(&users, &ident).await?;

    if user.apply_cart_delta(book_id, body.quantity) == CartEdit::Missing {
        books
            .find_one(doc! {"_id": book_id}, None)
            .await?
            .ok_or_else(|| ApiError::NotFound("book not found".to_string()))?;
        user.insert_cart_line(book_id, body.quantity);
    }

    users
        .update_one(
            doc! {"_id": user.id},
            doc! {"$set": {"cart": to_bson(&user.cart)?, "updatedAt": DateTime::now()}},
            None,
        )
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "",
        "result": user.cart_total(),
    })))
}

/// Cart listing with populated book detail. Line items whose book has been
/// deleted since are filtered out rather than surfaced as dangling refs.
pub async fn get_cart(
    users: web::Data<Collection<User>>,
    books: web::Data<Collection<Book>>,
    ident: Identity,
) -> Result<HttpResponse, ApiError> {
    let user = load_session(&users, &ident).await?;

    let book_ids: Vec<ObjectId> = user.cart.iter().map(|item| item.book).collect();
    let mut found: HashMap<ObjectId, Book> = HashMap::new();
    if !book_ids.is_empty() {
        let mut cursor = books.find(doc! {"_id": {"$in": book_ids}}, None).await?;
        while let Some(book) = cursor.next().await {
            let book = book?;
            found.insert(book.id, book);
        }
    }

    let result: Vec<_> = user
        .cart
        .iter()
        .filter_map(|item| {
            found
                .get(&item.book)
                .map(|book| json!({"book": book_summary(book), "quantity": item.quantity}))
        })
        .collect();
    Ok(HttpResponse::Ok().json(json!({"success": true, "message": "", "result": result})))
}
