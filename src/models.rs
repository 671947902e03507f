use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

pub mod roles {
    pub const USER: i32 = 0;
    pub const ADMIN: i32 = 1;
}

/// One favorites entry. Presence in the list is what actually means
/// "favorited"; the flag is kept for wire compatibility with existing clients.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteEntry {
    pub book: ObjectId,
    #[serde(default)]
    pub is_favorite: bool,
}

/// One cart line item. Invariant: quantity > 0 while the item exists; a
/// mutation that would drive it to zero or below removes the item instead.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CartItem {
    pub book: ObjectId,
    pub quantity: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub account: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub tokens: Vec<String>,
    #[serde(default)]
    pub role: i32,
    #[serde(default)]
    pub favorite: Vec<FavoriteEntry>,
    #[serde(default)]
    pub cart: Vec<CartItem>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Reply {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub user: ObjectId,
    pub comment: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Review {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub user: ObjectId,
    #[serde(default)]
    pub comment: String,
    pub rating: f64,
    #[serde(default)]
    pub reply: Vec<Reply>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub title: String,
    pub authors: String,
    pub publisher: String,
    pub retail_price: f64,
    pub categories: String,
    pub description: String,
    pub image: String,
    pub maturity_rating: String,
    #[serde(default)]
    pub reviews: Vec<Review>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user id as 24-char hex
    pub exp: usize,  // expiration as UTC timestamp
}

// ---- request payloads ----

#[derive(Debug, Deserialize)]
pub struct RegisterInput {
    pub account: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginInput {
    pub account: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteInput {
    pub book_id: String,
    pub is_favorite: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartInput {
    pub book_id: String,
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookInput {
    pub title: String,
    pub authors: String,
    pub publisher: String,
    pub retail_price: f64,
    pub categories: String,
    pub description: String,
    pub image: String,
    pub maturity_rating: String,
}

/// Field-wise edit payload; cover image and maturity rating are set at
/// creation and not editable through this surface.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookEditInput {
    pub title: String,
    pub authors: String,
    pub publisher: String,
    pub retail_price: f64,
    pub categories: String,
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct ReviewInput {
    #[serde(default)]
    pub comment: String,
    pub rating: f64,
}

// ---- validation ----

pub fn parse_object_id(raw: &str) -> Result<ObjectId, ApiError> {
    ObjectId::parse_str(raw).map_err(|_| ApiError::InvalidId)
}

pub fn validate_register(input: &RegisterInput) -> Result<(), ApiError> {
    if input.account.len() < 4 || input.account.len() > 20 {
        return Err(ApiError::Validation(
            "account must be 4 to 20 characters".to_string(),
        ));
    }
    if !input.account.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ApiError::Validation(
            "account must be alphanumeric".to_string(),
        ));
    }
    if !is_email(&input.email) {
        return Err(ApiError::Validation("invalid email address".to_string()));
    }
    if input.password.len() < 4 || input.password.len() > 20 {
        return Err(ApiError::Validation(
            "password must be 4 to 20 characters".to_string(),
        ));
    }
    Ok(())
}

fn is_email(raw: &str) -> bool {
    match raw.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

pub fn validate_book(input: &BookInput) -> Result<(), ApiError> {
    require_field(&input.title, "missing book title")?;
    require_field(&input.authors, "missing author name")?;
    require_field(&input.publisher, "missing publisher name")?;
    require_field(&input.categories, "missing book category")?;
    require_field(&input.description, "missing book description")?;
    require_field(&input.image, "missing book image")?;
    require_field(&input.maturity_rating, "missing maturity rating")?;
    Ok(())
}

pub fn validate_book_edit(input: &BookEditInput) -> Result<(), ApiError> {
    require_field(&input.title, "missing book title")?;
    require_field(&input.authors, "missing author name")?;
    require_field(&input.publisher, "missing publisher name")?;
    require_field(&input.categories, "missing book category")?;
    require_field(&input.description, "missing book description")?;
    Ok(())
}

fn require_field(value: &str, message: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        Err(ApiError::Validation(message.to_string()))
    } else {
        Ok(())
    }
}

// ---- aggregate mutations ----

/// Outcome of merging a quantity delta into an existing cart line.
#[derive(Debug, PartialEq, Eq)]
pub enum CartEdit {
    /// The line existed and its quantity was updated in place.
    Updated,
    /// The merged quantity reached zero or below; the line was removed.
    Removed,
    /// No line exists for this book; the caller decides whether to insert.
    Missing,
}

impl User {
    /// Merges `delta` into the line item for `book`, removing the line when
    /// the merged quantity drops to zero or below. Does not insert: a missing
    /// line is reported so the caller can check the book exists first.
    pub fn apply_cart_delta(&mut self, book: ObjectId, delta: i64) -> CartEdit {
        match self.cart.iter().position(|item| item.book == book) {
            Some(index) => {
                let quantity = self.cart[index].quantity + delta;
                if quantity <= 0 {
                    self.cart.remove(index);
                    CartEdit::Removed
                } else {
                    self.cart[index].quantity = quantity;
                    CartEdit::Updated
                }
            }
            None => CartEdit::Missing,
        }
    }

    pub fn insert_cart_line(&mut self, book: ObjectId, quantity: i64) {
        self.cart.push(CartItem { book, quantity });
    }

    /// Aggregate quantity across all line items.
    pub fn cart_total(&self) -> i64 {
        self.cart.iter().map(|item| item.quantity).sum()
    }

    /// Presence toggle. With `is_favorite` true, a repeated call on the same
    /// book un-favorites it; with false the entry is removed if present.
    pub fn toggle_favorite(&mut self, book: ObjectId, is_favorite: bool) {
        let existing = self.favorite.iter().position(|entry| entry.book == book);
        match (existing, is_favorite) {
            (Some(index), _) => {
                self.favorite.remove(index);
            }
            (None, true) => {
                self.favorite.push(FavoriteEntry {
                    book,
                    is_favorite: true,
                });
            }
            (None, false) => {}
        }
    }

    pub fn favorite_ids(&self) -> Vec<ObjectId> {
        self.favorite.iter().map(|entry| entry.book).collect()
    }
}

impl Book {
    pub fn review_by_user(&self, user: &ObjectId) -> Option<&Review> {
        self.reviews.iter().find(|review| &review.user == user)
    }

    /// Appends a review with a fresh sub-id and an empty reply list, returning
    /// a reference to it. Callers enforce the one-review-per-user invariant.
    pub fn append_review(&mut self, user: ObjectId, comment: String, rating: f64) -> &Review {
        self.reviews.push(Review {
            id: ObjectId::new(),
            user,
            comment,
            rating,
            reply: Vec::new(),
        });
        // just pushed, so the list is non-empty
        self.reviews.last().unwrap()
    }

    pub fn review_mut(&mut self, review_id: &ObjectId) -> Option<&mut Review> {
        self.reviews.iter_mut().find(|review| &review.id == review_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_user() -> User {
        User {
            id: ObjectId::new(),
            account: "reader01".to_string(),
            email: "reader01@example.com".to_string(),
            password: "hashed".to_string(),
            tokens: Vec::new(),
            role: roles::USER,
            favorite: Vec::new(),
            cart: Vec::new(),
            created_at: DateTime::now(),
            updated_at: DateTime::now(),
        }
    }

    fn empty_book() -> Book {
        Book {
            id: ObjectId::new(),
            title: "The Rust Programming Language".to_string(),
            authors: "Steve Klabnik".to_string(),
            publisher: "No Starch Press".to_string(),
            retail_price: 39.95,
            categories: "programming".to_string(),
            description: "the book".to_string(),
            image: "https://example.com/cover.png".to_string(),
            maturity_rating: "NOT_MATURE".to_string(),
            reviews: Vec::new(),
            created_at: DateTime::now(),
            updated_at: DateTime::now(),
        }
    }

    #[test]
    fn cart_delta_on_missing_line_reports_missing() {
        let mut user = empty_user();
        assert_eq!(user.apply_cart_delta(ObjectId::new(), 2), CartEdit::Missing);
        assert!(user.cart.is_empty());
    }

    #[test]
    fn cart_delta_merges_into_existing_line() {
        let mut user = empty_user();
        let book = ObjectId::new();
        user.insert_cart_line(book, 2);
        assert_eq!(user.apply_cart_delta(book, 1), CartEdit::Updated);
        assert_eq!(user.cart[0].quantity, 3);
        assert_eq!(user.cart_total(), 3);
    }

    #[test]
    fn cart_delta_reaching_zero_removes_the_line() {
        let mut user = empty_user();
        let book = ObjectId::new();
        let other = ObjectId::new();
        user.insert_cart_line(book, 3);
        user.insert_cart_line(other, 1);
        let before = user.cart_total();
        assert_eq!(user.apply_cart_delta(book, -3), CartEdit::Removed);
        assert!(user.cart.iter().all(|item| item.book != book));
        assert_eq!(user.cart_total(), before - 3);
    }

    #[test]
    fn cart_delta_going_negative_also_removes() {
        let mut user = empty_user();
        let book = ObjectId::new();
        user.insert_cart_line(book, 1);
        assert_eq!(user.apply_cart_delta(book, -5), CartEdit::Removed);
        assert!(user.cart.is_empty());
    }

    #[test]
    fn favorite_toggle_twice_restores_the_list() {
        let mut user = empty_user();
        let book = ObjectId::new();
        user.toggle_favorite(book, true);
        assert_eq!(user.favorite_ids(), vec![book]);
        user.toggle_favorite(book, true);
        assert!(user.favorite.is_empty());
    }

    #[test]
    fn favorite_toggle_never_duplicates_an_entry() {
        let mut user = empty_user();
        let book = ObjectId::new();
        user.toggle_favorite(book, true);
        user.toggle_favorite(book, true);
        user.toggle_favorite(book, true);
        assert_eq!(user.favorite.len(), 1);
    }

    #[test]
    fn favorite_unset_is_a_noop_when_absent() {
        let mut user = empty_user();
        user.toggle_favorite(ObjectId::new(), false);
        assert!(user.favorite.is_empty());
    }

    #[test]
    fn favorite_unset_removes_an_existing_entry() {
        let mut user = empty_user();
        let book = ObjectId::new();
        user.toggle_favorite(book, true);
        user.toggle_favorite(book, false);
        assert!(user.favorite.is_empty());
    }

    #[test]
    fn one_review_per_user_is_detectable() {
        let mut book = empty_book();
        let reviewer = ObjectId::new();
        assert!(book.review_by_user(&reviewer).is_none());
        book.append_review(reviewer, "great".to_string(), 5.0);
        assert!(book.review_by_user(&reviewer).is_some());
        assert!(book.review_by_user(&ObjectId::new()).is_none());
    }

    #[test]
    fn appended_review_starts_with_empty_replies() {
        let mut book = empty_book();
        let review = book.append_review(ObjectId::new(), "good".to_string(), 4.0);
        assert!(review.reply.is_empty());
        assert_eq!(review.rating, 4.0);
    }

    #[test]
    fn review_mut_finds_by_sub_id() {
        let mut book = empty_book();
        let id = book.append_review(ObjectId::new(), "ok".to_string(), 3.0).id;
        {
            let review = book.review_mut(&id).expect("review exists");
            review.comment = "better on a re-read".to_string();
            review.rating = 4.0;
        }
        assert_eq!(book.reviews[0].comment, "better on a re-read");
        assert!(book.review_mut(&ObjectId::new()).is_none());
    }

    #[test]
    fn register_validation_reports_first_failing_field() {
        let mut input = RegisterInput {
            account: "ab".to_string(),
            email: "nope".to_string(),
            password: "x".to_string(),
        };
        let err = validate_register(&input).unwrap_err();
        assert_eq!(err.to_string(), "account must be 4 to 20 characters");

        input.account = "reader01".to_string();
        let err = validate_register(&input).unwrap_err();
        assert_eq!(err.to_string(), "invalid email address");

        input.email = "reader01@example.com".to_string();
        let err = validate_register(&input).unwrap_err();
        assert_eq!(err.to_string(), "password must be 4 to 20 characters");

        input.password = "secret".to_string();
        assert!(validate_register(&input).is_ok());
    }

    #[test]
    fn register_rejects_non_alphanumeric_accounts() {
        let input = RegisterInput {
            account: "read er".to_string(),
            email: "reader@example.com".to_string(),
            password: "secret".to_string(),
        };
        let err = validate_register(&input).unwrap_err();
        assert_eq!(err.to_string(), "account must be alphanumeric");
    }

    #[test]
    fn email_shapes() {
        assert!(is_email("a@b.co"));
        assert!(!is_email("a@b"));
        assert!(!is_email("@b.co"));
        assert!(!is_email("a@.co"));
        assert!(!is_email("a@b."));
        assert!(!is_email("plain"));
    }

    #[test]
    fn book_validation_reports_first_missing_field() {
        let input = BookInput {
            title: "  ".to_string(),
            authors: String::new(),
            publisher: String::new(),
            retail_price: 10.0,
            categories: String::new(),
            description: String::new(),
            image: String::new(),
            maturity_rating: String::new(),
        };
        let err = validate_book(&input).unwrap_err();
        assert_eq!(err.to_string(), "missing book title");
    }

    #[test]
    fn malformed_object_id_is_invalid_id() {
        assert!(matches!(parse_object_id("abc"), Err(ApiError::InvalidId)));
        assert!(parse_object_id("65f0aa11bb22cc33dd44ee55").is_ok());
    }
}
