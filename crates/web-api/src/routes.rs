//! 操作式 HTTP 接口
//!
//! 所有业务接口都挂在 `/api` 下，通过 HTTP 方法加 `action` 查询参数分发。

use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use application::{rate_limit_identifier, LeaveOutcome, UserDto};
use domain::{AccessToken, MessageId, RoomId, RoomType, Username};

use crate::auth::{authenticate, client_origin, AuthenticatedUser, USERNAME_HEADER};
use crate::{error::ApiError, state::AppState};

type Params = HashMap<String, String>;
type ApiResult = Result<Response, ApiError>;

#[derive(Debug, Deserialize)]
struct CreateUserPayload {
    username: String,
    #[serde(default)]
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginPayload {
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct CreateRoomPayload {
    #[serde(rename = "type")]
    room_type: RoomType,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    members: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MembershipPayload {
    room_id: String,
    username: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessagePayload {
    room_id: String,
    username: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct RefreshTokenPayload {
    username: String,
    token: String,
}

pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.cors_origins);
    Router::new()
        .route("/health", get(health))
        .route(
            "/api",
            get(dispatch_get).post(dispatch_post).delete(dispatch_delete),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(USERNAME_HEADER),
        ]);

    if origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin, "忽略无效的 CORS 来源");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn dispatch_get(State(state): State<AppState>, Query(params): Query<Params>) -> ApiResult {
    match action(&params)? {
        "getRooms" => get_rooms(&state, &params).await,
        "getRoom" => get_room(&state, &params).await,
        "getMessages" => get_messages(&state, &params).await,
        "getBulkMessages" => get_bulk_messages(&state, &params).await,
        "getRoomUsers" => get_room_users(&state, &params).await,
        "getUsers" => get_users(&state, &params).await,
        other => Err(unknown_action(other)),
    }
}

async fn dispatch_post(
    State(state): State<AppState>,
    Query(params): Query<Params>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult {
    match action(&params)? {
        "createUser" => create_user(&state, &headers, parse_body(&body)?).await,
        "login" => login(&state, &headers, parse_body(&body)?).await,
        "createRoom" => create_room(&state, &headers, parse_body(&body)?).await,
        "joinRoom" => join_room(&state, parse_body(&body)?).await,
        "leaveRoom" => leave_room(&state, parse_body(&body)?).await,
        "sendMessage" => send_message(&state, parse_body(&body)?).await,
        "generateToken" => generate_token(&state, &headers).await,
        "refreshToken" => refresh_token(&state, &headers, parse_body(&body)?).await,
        "logoutCurrent" => logout_current(&state, &headers).await,
        "logoutAllDevices" => logout_all_devices(&state, &headers).await,
        other => Err(unknown_action(other)),
    }
}

async fn dispatch_delete(
    State(state): State<AppState>,
    Query(params): Query<Params>,
    headers: HeaderMap,
) -> ApiResult {
    match action(&params)? {
        "deleteRoom" => delete_room(&state, &headers, &params).await,
        "deleteMessage" => delete_message(&state, &headers, &params).await,
        other => Err(unknown_action(other)),
    }
}

fn action(params: &Params) -> Result<&str, ApiError> {
    params
        .get("action")
        .map(String::as_str)
        .ok_or_else(|| ApiError::bad_request("missing action parameter"))
}

fn unknown_action(action: &str) -> ApiError {
    tracing::debug!(action, "未知操作");
    ApiError::bad_request(format!("unknown action: {action}"))
}

fn param<'a>(params: &'a Params, name: &str) -> Result<&'a str, ApiError> {
    params
        .get(name)
        .map(String::as_str)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request(format!("missing {name} parameter")))
}

fn room_id_param(params: &Params) -> Result<RoomId, ApiError> {
    Ok(RoomId::parse(param(params, "roomId")?)?)
}

/// 空请求体按 `{}` 处理
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    let raw: &[u8] = if body.iter().all(u8::is_ascii_whitespace) {
        b"{}"
    } else {
        body
    };
    serde_json::from_slice(raw)
        .map_err(|err| ApiError::bad_request(format!("invalid request body: {err}")))
}

/// 敏感操作限流，存储故障时放行
async fn guard_sensitive(
    state: &AppState,
    action: &str,
    user: Option<&Username>,
    headers: &HeaderMap,
) -> Result<(), ApiError> {
    let identifier = rate_limit_identifier(user, &client_origin(headers));
    state
        .services
        .rate_limiter
        .check_action(action, &identifier)
        .await
        .map_err(|err| application::ApplicationError::from(err).into())
}

fn ok(body: serde_json::Value) -> ApiResult {
    Ok(Json(body).into_response())
}

fn created(body: serde_json::Value) -> ApiResult {
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

async fn get_rooms(state: &AppState, params: &Params) -> ApiResult {
    let viewer = match params.get("username").filter(|name| !name.is_empty()) {
        Some(name) => Some(Username::parse(name.as_str())?),
        None => None,
    };
    let rooms = state.services.rooms.list_visible(viewer.as_ref()).await?;
    ok(json!({ "rooms": rooms }))
}

async fn get_room(state: &AppState, params: &Params) -> ApiResult {
    let room = state.services.rooms.get(&room_id_param(params)?).await?;
    ok(json!({ "room": room }))
}

async fn get_messages(state: &AppState, params: &Params) -> ApiResult {
    let messages = state.services.messages.list(&room_id_param(params)?).await?;
    ok(json!({ "messages": messages }))
}

async fn get_bulk_messages(state: &AppState, params: &Params) -> ApiResult {
    let room_ids: Vec<String> = param(params, "roomIds")?
        .split(',')
        .map(str::to_owned)
        .collect();
    let bulk = state.services.messages.list_bulk(&room_ids).await?;
    Ok(Json(bulk).into_response())
}

async fn get_room_users(state: &AppState, params: &Params) -> ApiResult {
    let users = state
        .services
        .rooms
        .active_users(&room_id_param(params)?)
        .await?;
    ok(json!({ "users": users }))
}

async fn get_users(state: &AppState, params: &Params) -> ApiResult {
    let query = params.get("search").map(String::as_str).unwrap_or_default();
    let users = state.services.users.search(query).await?;
    ok(json!({ "users": users }))
}

async fn create_user(state: &AppState, headers: &HeaderMap, payload: CreateUserPayload) -> ApiResult {
    guard_sensitive(state, "createUser", None, headers).await?;
    let username = Username::parse(payload.username)?;
    let user = state
        .services
        .users
        .create(&username, payload.password.as_deref())
        .await?;
    let token = state.services.tokens.issue(&username).await?;
    created(json!({ "user": UserDto::from(&user), "token": token }))
}

async fn login(state: &AppState, headers: &HeaderMap, payload: LoginPayload) -> ApiResult {
    guard_sensitive(state, "login", None, headers).await?;
    let username = Username::parse(payload.username)?;
    let user = state
        .services
        .users
        .verify_password(&username, &payload.password)
        .await?;
    let token = state.services.tokens.issue(&username).await?;
    ok(json!({ "user": UserDto::from(&user), "token": token }))
}

async fn create_room(state: &AppState, headers: &HeaderMap, payload: CreateRoomPayload) -> ApiResult {
    let AuthenticatedUser { username, .. } = authenticate(state, headers).await?;
    guard_sensitive(state, "createRoom", Some(&username), headers).await?;
    let members = payload
        .members
        .iter()
        .map(|member| Username::parse(member.as_str()))
        .collect::<Result<Vec<_>, _>>()?;
    let room = state
        .services
        .rooms
        .create(payload.room_type, payload.name.as_deref(), members, &username)
        .await?;
    created(json!({ "room": room }))
}

async fn join_room(state: &AppState, payload: MembershipPayload) -> ApiResult {
    let room_id = RoomId::parse(payload.room_id)?;
    let username = Username::parse(payload.username)?;
    let room = state.services.rooms.join(&room_id, &username).await?;
    ok(json!({ "room": room }))
}

async fn leave_room(state: &AppState, payload: MembershipPayload) -> ApiResult {
    let room_id = RoomId::parse(payload.room_id)?;
    let username = Username::parse(payload.username)?;
    match state.services.rooms.leave(&room_id, &username).await? {
        LeaveOutcome::NotPresent => ok(json!({ "status": "notPresent" })),
        LeaveOutcome::Left(room) => ok(json!({ "status": "left", "room": room })),
        LeaveOutcome::Dissolved => ok(json!({ "status": "dissolved" })),
    }
}

async fn send_message(state: &AppState, payload: SendMessagePayload) -> ApiResult {
    let message = state
        .services
        .messages
        .send(&payload.room_id, &payload.username, &payload.content)
        .await?;
    created(json!({ "message": message }))
}

async fn generate_token(state: &AppState, headers: &HeaderMap) -> ApiResult {
    let AuthenticatedUser { username, .. } = authenticate(state, headers).await?;
    guard_sensitive(state, "generateToken", Some(&username), headers).await?;
    let token = state.services.tokens.issue(&username).await?;
    ok(json!({ "token": token }))
}

async fn refresh_token(
    state: &AppState,
    headers: &HeaderMap,
    payload: RefreshTokenPayload,
) -> ApiResult {
    guard_sensitive(state, "refreshToken", None, headers).await?;
    let username = Username::parse(payload.username)?;
    let old_token = AccessToken::from_raw(payload.token);
    let token = state.services.tokens.refresh(&username, &old_token).await?;
    ok(json!({ "token": token }))
}

async fn logout_current(state: &AppState, headers: &HeaderMap) -> ApiResult {
    let AuthenticatedUser { token, .. } = authenticate(state, headers).await?;
    let revoked = state.services.tokens.revoke(&token).await?;
    ok(json!({ "revoked": revoked }))
}

async fn logout_all_devices(state: &AppState, headers: &HeaderMap) -> ApiResult {
    let AuthenticatedUser { username, .. } = authenticate(state, headers).await?;
    let revoked = state.services.tokens.revoke_all(&username).await?;
    ok(json!({ "revoked": revoked }))
}

async fn delete_room(state: &AppState, headers: &HeaderMap, params: &Params) -> ApiResult {
    let AuthenticatedUser { username, .. } = authenticate(state, headers).await?;
    let room_id = room_id_param(params)?;
    state.services.rooms.delete(&room_id, &username).await?;
    ok(json!({ "deleted": true, "roomId": room_id }))
}

async fn delete_message(state: &AppState, headers: &HeaderMap, params: &Params) -> ApiResult {
    let AuthenticatedUser { username, .. } = authenticate(state, headers).await?;
    let room_id = room_id_param(params)?;
    let message_id = MessageId::parse(param(params, "messageId")?)?;
    state
        .services
        .messages
        .delete(&room_id, message_id, &username)
        .await?;
    ok(json!({ "deleted": true, "messageId": message_id }))
}
