use actix_web::{web, HttpResponse};
use futures::stream::StreamExt;
use mongodb::bson::{doc, oid::ObjectId, to_bson, DateTime, Document};
use mongodb::options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument};
use mongodb::Collection;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};

use crate::auth::Identity;
use crate::error::ApiError;
use crate::models::{
    parse_object_id, validate_book, validate_book_edit, Book, BookEditInput, BookInput, Review,
    ReviewInput, User,
};
use crate::users::{load_session, require_admin};

/// Raw catalog query string parameters. Everything is accepted as a string so
/// malformed numerics fall back to defaults instead of failing extraction.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub search: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub items_per_page: Option<String>,
    pub page: Option<String>,
}

const SORT_FIELDS: &[&str] = &[
    "title",
    "authors",
    "publisher",
    "retailPrice",
    "categories",
    "maturityRating",
    "createdAt",
    "updatedAt",
];

/// Normalized catalog parameters. Sort fields are whitelisted so a client
/// string never becomes a raw query key.
#[derive(Debug, PartialEq, Eq)]
pub struct ListParams {
    pub sort_by: String,
    pub sort_order: i32,
    pub items_per_page: i64,
    pub page: i64,
}

impl ListParams {
    pub fn from_query(query: &ListQuery) -> Self {
        let sort_by = query
            .sort_by
            .as_deref()
            .filter(|field| SORT_FIELDS.contains(field))
            .unwrap_or("createdAt")
            .to_string();
        let sort_order = query
            .sort_order
            .as_deref()
            .and_then(|raw| raw.parse().ok())
            .filter(|order| *order == 1 || *order == -1)
            .unwrap_or(-1);
        let items_per_page = query
            .items_per_page
            .as_deref()
            .and_then(|raw| raw.parse().ok())
            .filter(|count| *count != 0)
            .unwrap_or(20);
        let page = query
            .page
            .as_deref()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(1)
            .max(1);

        ListParams {
            sort_by,
            sort_order,
            items_per_page,
            page,
        }
    }

    /// Negative page size means "unlimited": no skip, no limit.
    pub fn skip(&self) -> Option<u64> {
        if self.items_per_page < 0 {
            None
        } else {
            Some(((self.page - 1) * self.items_per_page) as u64)
        }
    }

    pub fn limit(&self) -> Option<i64> {
        if self.items_per_page < 0 {
            None
        } else {
            Some(self.items_per_page)
        }
    }

    pub fn sort(&self) -> Document {
        let mut sort = Document::new();
        sort.insert(self.sort_by.as_str(), self.sort_order);
        sort
    }
}

/// Case-insensitive substring match OR'd across title, authors and publisher.
/// An empty search matches everything.
fn search_filter(search: Option<&str>) -> Document {
    let pattern = search.unwrap_or("");
    doc! {"$or": [
        {"title": {"$regex": pattern, "$options": "i"}},
        {"authors": {"$regex": pattern, "$options": "i"}},
        {"publisher": {"$regex": pattern, "$options": "i"}},
    ]}
}

fn format_time(timestamp: DateTime) -> String {
    timestamp.try_to_rfc3339_string().unwrap_or_default()
}

/// Book as rendered in list views and cart population; embedded reviews are
/// only rendered by the single-book fetch.
pub fn book_summary(book: &Book) -> Value {
    json!({
        "_id": book.id.to_hex(),
        "title": book.title,
        "authors": book.authors,
        "publisher": book.publisher,
        "retailPrice": book.retail_price,
        "categories": book.categories,
        "description": book.description,
        "image": book.image,
        "maturityRating": book.maturity_rating,
        "createdAt": format_time(book.created_at),
        "updatedAt": format_time(book.updated_at),
    })
}

fn review_json(review: &Review, accounts: &HashMap<ObjectId, String>) -> Value {
    let reviewer = |id: &ObjectId| {
        json!({
            "_id": id.to_hex(),
            "account": accounts.get(id).cloned().unwrap_or_default(),
        })
    };
    json!({
        "_id": review.id.to_hex(),
        "user": reviewer(&review.user),
        "comment": review.comment,
        "rating": review.rating,
        "reply": review
            .reply
            .iter()
            .map(|reply| json!({
                "_id": reply.id.to_hex(),
                "user": reviewer(&reply.user),
                "comment": reply.comment,
            }))
            .collect::<Vec<_>>(),
    })
}

fn book_detail(book: &Book, accounts: &HashMap<ObjectId, String>) -> Value {
    let mut detail = book_summary(book);
    if let Value::Object(map) = &mut detail {
        map.insert(
            "reviews".to_string(),
            Value::Array(
                book.reviews
                    .iter()
                    .map(|review| review_json(review, accounts))
                    .collect(),
            ),
        );
    }
    detail
}

async fn query_catalog(
    books: &Collection<Book>,
    query: &ListQuery,
) -> Result<Value, ApiError> {
    let params = ListParams::from_query(query);
    let options = FindOptions::builder()
        .sort(params.sort())
        .skip(params.skip())
        .limit(params.limit())
        .build();

    let mut cursor = books
        .find(search_filter(query.search.as_deref()), options)
        .await?;
    let mut data = Vec::new();
    while let Some(book) = cursor.next().await {
        data.push(book_summary(&book?));
    }

    // Unfiltered approximate count, while `data` is filtered. Known
    // inconsistency the clients already depend on.
    let total = books.estimated_document_count(None).await?;

    Ok(json!({"data": data, "total": total}))
}

pub async fn list(
    books: web::Data<Collection<Book>>,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, ApiError> {
    let result = query_catalog(&books, &query).await?;
    Ok(HttpResponse::Ok().json(json!({"success": true, "message": "", "result": result})))
}

/// Admin listing; same query engine as the public catalog.
pub async fn get_all(
    users: web::Data<Collection<User>>,
    books: web::Data<Collection<Book>>,
    ident: Identity,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, ApiError> {
    let user = load_session(&users, &ident).await?;
    require_admin(&user)?;

    let result = query_catalog(&books, &query).await?;
    Ok(HttpResponse::Ok().json(json!({"success": true, "message": "", "result": result})))
}

/// Single-book fetch with reviewer and reply-author account names populated.
pub async fn get(
    users: web::Data<Collection<User>>,
    books: web::Data<Collection<Book>>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let book_id = parse_object_id(&path)?;
    let book = books
        .find_one(doc! {"_id": book_id}, None)
        .await?
        .ok_or_else(|| ApiError::NotFound("book not found".to_string()))?;

    let mut reviewer_ids: HashSet<ObjectId> = HashSet::new();
    for review in &book.reviews {
        reviewer_ids.insert(review.user);
        for reply in &review.reply {
            reviewer_ids.insert(reply.user);
        }
    }

    let mut accounts: HashMap<ObjectId, String> = HashMap::new();
    if !reviewer_ids.is_empty() {
        let ids: Vec<ObjectId> = reviewer_ids.into_iter().collect();
        let mut cursor = users.find(doc! {"_id": {"$in": ids}}, None).await?;
        while let Some(user) = cursor.next().await {
            let user = user?;
            accounts.insert(user.id, user.account);
        }
    }

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "",
        "result": book_detail(&book, &accounts),
    })))
}

pub async fn create(
    users: web::Data<Collection<User>>,
    books: web::Data<Collection<Book>>,
    ident: Identity,
    body: web::Json<BookInput>,
) -> Result<HttpResponse, ApiError> {
    let user = load_session(&users, &ident).await?;
    require_admin(&user)?;
    validate_book(&body)?;

    // Pre-insert check; the unique title index catches the race as a fallback.
    let existing = books.find_one(doc! {"title": &body.title}, None).await?;
    if existing.is_some() {
        return Err(ApiError::Conflict("duplicate title".to_string()));
    }

    let now = DateTime::now();
    let book = Book {
        id: ObjectId::new(),
        title: body.title.clone(),
        authors: body.authors.clone(),
        publisher: body.publisher.clone(),
        retail_price: body.retail_price,
        categories: body.categories.clone(),
        description: body.description.clone(),
        image: body.image.clone(),
        maturity_rating: body.maturity_rating.clone(),
        reviews: Vec::new(),
        created_at: now,
        updated_at: now,
    };
    books.insert_one(&book, None).await?;

    Ok(HttpResponse::Created().json(json!({
        "success": true,
        "message": "",
        "result": book_summary(&book),
    })))
}

/// Hard delete with no cascade; favorite/cart/review references elsewhere are
/// left behind and filtered at read time.
pub async fn delete_book(
    users: web::Data<Collection<User>>,
    books: web::Data<Collection<Book>>,
    ident: Identity,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let user = load_session(&users, &ident).await?;
    require_admin(&user)?;

    let book_id = parse_object_id(&path)?;
    let book = books
        .find_one_and_delete(doc! {"_id": book_id}, None)
        .await?
        .ok_or_else(|| ApiError::NotFound("book not found".to_string()))?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "book deleted",
        "result": book_summary(&book),
    })))
}

pub async fn edit_book(
    users: web::Data<Collection<User>>,
    books: web::Data<Collection<Book>>,
    ident: Identity,
    path: web::Path<String>,
    body: web::Json<BookEditInput>,
) -> Result<HttpResponse, ApiError> {
    let user = load_session(&users, &ident).await?;
    require_admin(&user)?;

    let book_id = parse_object_id(&path)?;
    validate_book_edit(&body)?;

    let options = FindOneAndUpdateOptions::builder()
        .return_document(ReturnDocument::After)
        .build();
    let book = books
        .find_one_and_update(
            doc! {"_id": book_id},
            doc! {"$set": {
                "title": &body.title,
                "authors": &body.authors,
                "publisher": &body.publisher,
                "retailPrice": body.retail_price,
                "categories": &body.categories,
                "description": &body.description,
                "updatedAt": DateTime::now(),
            }},
            options,
        )
        .await?
        .ok_or_else(|| ApiError::NotFound("book not found".to_string()))?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "book updated",
        "result": book_summary(&book),
    })))
}

/// Appends a review, enforcing one review per user per book. Responds with
/// the created sub-document including the reviewer's account name.
pub async fn add_review(
    users: web::Data<Collection<User>>,
    books: web::Data<Collection<Book>>,
    ident: Identity,
    path: web::Path<String>,
    body: web::Json<ReviewInput>,
) -> Result<HttpResponse, ApiError> {
    let user = load_session(&users, &ident).await?;

    let book_id = parse_object_id(&path)?;
    let mut book = books
        .find_one(doc! {"_id": book_id}, None)
        .await?
        .ok_or_else(|| ApiError::NotFound("book not found".to_string()))?;

    if book.review_by_user(&user.id).is_some() {
        return Err(ApiError::Conflict(
            "review can only be written once".to_string(),
        ));
    }

    let review = book
        .append_review(user.id, body.comment.clone(), body.rating)
        .clone();
    books
        .update_one(
            doc! {"_id": book.id},
            doc! {"$set": {"reviews": to_bson(&book.reviews)?, "updatedAt": DateTime::now()}},
            None,
        )
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "",
        "result": {
            "_id": review.id.to_hex(),
            "comment": review.comment,
            "rating": review.rating,
            "reply": [],
            "user": {
                "_id": user.id.to_hex(),
                "account": user.account,
            }
        }
    })))
}

/// Edits a review sub-document in place, addressed by book id and review
/// sub-id path parameters.
pub async fn edit_review(
    users: web::Data<Collection<User>>,
    books: web::Data<Collection<Book>>,
    ident: Identity,
    path: web::Path<(String, String)>,
    body: web::Json<ReviewInput>,
) -> Result<HttpResponse, ApiError> {
    load_session(&users, &ident).await?;

    let (raw_book_id, raw_review_id) = path.into_inner();
    let book_id = parse_object_id(&raw_book_id)?;
    let review_id = parse_object_id(&raw_review_id)?;

    let mut book = books
        .find_one(doc! {"_id": book_id}, None)
        .await?
        .ok_or_else(|| ApiError::NotFound("book not found".to_string()))?;

    let review = book
        .review_mut(&review_id)
        .ok_or_else(|| ApiError::NotFound("review not found".to_string()))?;
    review.comment = body.comment.clone();
    review.rating = body.rating;

    books
        .update_one(
            doc! {"_id": book.id},
            doc! {"$set": {"reviews": to_bson(&book.reviews)?, "updatedAt": DateTime::now()}},
            None,
        )
        .await?;

    Ok(HttpResponse::Ok().json(json!({"success": true, "message": "review updated"})))
}
