use crate::domain::persistence::{SaveError, SaveGame};
use crate::interface_adapters::http::error_response;
use crate::interface_adapters::protocol::ServerStateDto;
use crate::interface_adapters::state::AppState;
use crate::use_cases::{LobbyError, ViewSummary};

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::{collections::HashSet, sync::Arc};
use tracing::{info, warn};

#[derive(Debug, serde::Deserialize)]
pub struct LobbyInitRequest {
    // Lobby id provided by the caller.
    lobby_id: String,
    // Player ids that are allowed to spawn into the lobby.
    #[serde(default)]
    allowed_player_ids: Vec<u64>,
    // Save file to restore the world from; any supported schema version.
    #[serde(default)]
    save: Option<serde_json::Value>,
}

#[derive(Debug, serde::Serialize)]
struct LobbyInitResponse {
    // The lobby id that was created.
    lobby_id: String,
    restored: bool,
}

#[derive(Debug, serde::Serialize)]
struct LobbyStateResponse {
    lobby_id: String,
    server_state: ServerStateDto,
    connected_players: usize,
    // Absent until the first tick was recorded.
    world: Option<ViewSummary>,
}

fn lobby_error_response(err: LobbyError) -> Response {
    let status = match err {
        LobbyError::AlreadyExists | LobbyError::PlayerConnected => StatusCode::CONFLICT,
        LobbyError::NotFound => StatusCode::NOT_FOUND,
        LobbyError::Closed => StatusCode::SERVICE_UNAVAILABLE,
    };
    error_response(status, err)
}

pub async fn create_lobby_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LobbyInitRequest>,
) -> Response {
    // Ensure we have a lobby id to create.
    let lobby_id = payload.lobby_id.trim().to_string();
    if lobby_id.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "lobby_id is required");
    }

    // Version checks and migrations run before any world is built.
    let restore = match payload.save.map(|raw| SaveGame::from_json(&raw.to_string())) {
        None => None,
        Some(Ok(save)) => Some(save),
        Some(Err(err)) => {
            warn!(lobby_id = %lobby_id, error = %err, "rejected lobby save");
            let status = match err {
                SaveError::UnsupportedVersion(_) => StatusCode::UNPROCESSABLE_ENTITY,
                _ => StatusCode::BAD_REQUEST,
            };
            return error_response(status, err);
        }
    };
    let restored = restore.is_some();

    let allowed_players: HashSet<u64> = payload.allowed_player_ids.into_iter().collect();

    // Created lobbies are not pinned and will be removed on last disconnect.
    match state
        .lobby_registry
        .create_lobby(lobby_id.clone(), allowed_players, false, restore)
        .await
    {
        Ok(_) => (
            StatusCode::CREATED,
            Json(LobbyInitResponse { lobby_id, restored }),
        )
            .into_response(),
        Err(err) => lobby_error_response(err),
    }
}

pub async fn lobby_state_handler(
    State(state): State<Arc<AppState>>,
    Path(lobby_id): Path<String>,
) -> Response {
    let Some(lobby) = state.lobby_registry.get_lobby(&lobby_id).await else {
        return lobby_error_response(LobbyError::NotFound);
    };

    Json(LobbyStateResponse {
        lobby_id,
        server_state: lobby.view.server_state().into(),
        connected_players: lobby.connected_players().await,
        world: lobby.view.summary(),
    })
    .into_response()
}

pub async fn save_lobby_handler(
    State(state): State<Arc<AppState>>,
    Path(lobby_id): Path<String>,
) -> Response {
    let Some(lobby) = state.lobby_registry.get_lobby(&lobby_id).await else {
        return lobby_error_response(LobbyError::NotFound);
    };

    match lobby.request_save().await {
        Ok(save) => {
            info!(
                lobby_id = %lobby_id,
                divergence = save.divergence.len(),
                "lobby saved"
            );
            Json(save).into_response()
        }
        Err(err) => lobby_error_response(err),
    }
}

pub async fn delete_lobby_handler(
    State(state): State<Arc<AppState>>,
    Path(lobby_id): Path<String>,
) -> Response {
    if lobby_id == *state.default_lobby_id {
        return error_response(StatusCode::FORBIDDEN, "default lobby cannot be removed");
    }
    match state.lobby_registry.remove_lobby(&lobby_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => lobby_error_response(err),
    }
}
