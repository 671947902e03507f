use actix_web::dev::Payload;
use actix_web::{web, FromRequest, HttpRequest};
use futures::future::{ready, Ready};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use mongodb::bson::oid::ObjectId;

use crate::config::AppConfig;
use crate::error::ApiError;
use crate::models::Claims;

const TOKEN_LIFETIME_DAYS: i64 = 7;

/// Identity attached to a request that carried a valid bearer token. The
/// signature check happens here; whether the token is still in the user's
/// active token list is re-checked by handlers that need a live session.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: ObjectId,
    pub token: String,
}

impl FromRequest for Identity {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(extract_identity(req))
    }
}

fn extract_identity(req: &HttpRequest) -> Result<Identity, ApiError> {
    let config = req
        .app_data::<web::Data<AppConfig>>()
        .ok_or_else(|| ApiError::Internal("app config not registered".to_string()))?;

    let header = req
        .headers()
        .get("Authorization")
        .ok_or_else(|| ApiError::Unauthorized("authorization header missing".to_string()))?;

    let value = header
        .to_str()
        .map_err(|_| ApiError::Unauthorized("invalid authorization header".to_string()))?;

    let token = value
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::Unauthorized("invalid authorization scheme".to_string()))?;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_ref()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|_| ApiError::Unauthorized("invalid token".to_string()))?;

    let user_id = ObjectId::parse_str(&token_data.claims.sub)
        .map_err(|_| ApiError::Unauthorized("invalid token".to_string()))?;

    Ok(Identity {
        user_id,
        token: token.to_string(),
    })
}

/// Issues a 7-day HS256 bearer token for the given user id.
pub fn sign_token(user_id: &ObjectId, secret: &str) -> Result<String, ApiError> {
    let expiration = chrono::Utc::now()
        .checked_add_signed(chrono::Duration::days(TOKEN_LIFETIME_DAYS))
        .ok_or_else(|| ApiError::Internal("token expiry overflow".to_string()))?
        .timestamp() as usize;

    let claims = Claims {
        sub: user_id.to_hex(),
        exp: expiration,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )
    .map_err(|err| ApiError::Internal(format!("failed to encode token: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use actix_web::{test, App, HttpResponse};

    const SECRET: &str = "test-secret";

    async fn whoami(ident: Identity) -> HttpResponse {
        HttpResponse::Ok().body(ident.user_id.to_hex())
    }

    fn test_config() -> AppConfig {
        AppConfig {
            database_url: String::new(),
            jwt_secret: SECRET.to_string(),
            port: 0,
        }
    }

    #[actix_web::test]
    async fn valid_token_yields_the_identity() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(test_config()))
                .route("/whoami", web::get().to(whoami)),
        )
        .await;

        let user_id = ObjectId::new();
        let token = sign_token(&user_id, SECRET).expect("token signs");
        let req = test::TestRequest::get()
            .uri("/whoami")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::OK);
        let body = test::read_body(resp).await;
        assert_eq!(&body[..], user_id.to_hex().as_bytes());
    }

    #[actix_web::test]
    async fn missing_header_is_rejected() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(test_config()))
                .route("/whoami", web::get().to(whoami)),
        )
        .await;

        let req = test::TestRequest::get().uri("/whoami").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn wrong_scheme_and_garbage_tokens_are_rejected() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(test_config()))
                .route("/whoami", web::get().to(whoami)),
        )
        .await;

        for header in ["Basic abc", "Bearer not-a-jwt"] {
            let req = test::TestRequest::get()
                .uri("/whoami")
                .insert_header(("Authorization", header))
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "header: {header}");
        }
    }

    #[actix_web::test]
    async fn token_signed_with_another_secret_is_rejected() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(test_config()))
                .route("/whoami", web::get().to(whoami)),
        )
        .await;

        let token = sign_token(&ObjectId::new(), "other-secret").expect("token signs");
        let req = test::TestRequest::get()
            .uri("/whoami")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
