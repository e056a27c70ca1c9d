//! GraphQL access to the shin service.
//!
//! Every call carries the session bearer token, refreshed shortly before it
//! expires. Responses are classified into the two failure classes the sweep
//! cares about: overload (skip the circle) and everything else (abort).

use std::time::Instant;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shinbot_core::{Circle, Identity, RemoteError, Resource, ResourceClient};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::auth::{IdentityProvider, Session};

pub const API_URL: &str = "https://shinner-backend-production-amd4bgjgpq-ez.a.run.app/api/graphql";

const USER_AGENT: &str = "shinner/1050 CFNetwork/1496.0.7 Darwin/23.5.0";
const APOLLO_CLIENT_NAME: &str = "shinner-app-prod-ios";

const NEARBY_SHINS_QUERY: &str = r#"
query GetNearbyShins($input: GetNearbyShinsInput!) {
  getNearbyShins(input: $input) {
    shins { id amount latitude longitude found foundBy { username id } }
  }
}"#;

const COLLECT_SHIN_MUTATION: &str = r#"
mutation CollectShin($input: CollectShinInput!) {
  collectShin(input: $input)
}"#;

const GET_USER_QUERY: &str = r#"
query GetUser($id: ID!) {
  getUser(id: $id) { id username shins }
}"#;

/// GraphQL error codes and message fragments that mean "slow down".
const OVERLOAD_CODES: &[&str] = &["RATE_LIMITED", "TOO_MANY_REQUESTS", "RESOURCE_EXHAUSTED", "QUOTA_EXCEEDED"];
const OVERLOAD_MESSAGES: &[&str] = &["rate limit", "too many requests", "quota", "resource exhausted", "try again later"];

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    extensions: Option<ErrorExtensions>,
}

#[derive(Debug, Deserialize)]
struct ErrorExtensions {
    #[serde(default)]
    code: Option<String>,
}

impl GraphQlError {
    fn is_overload(&self) -> bool {
        let code = self.extensions.as_ref().and_then(|e| e.code.as_deref());
        if code.is_some_and(|c| OVERLOAD_CODES.iter().any(|o| c.eq_ignore_ascii_case(o))) {
            return true;
        }
        let message = self.message.to_ascii_lowercase();
        OVERLOAD_MESSAGES.iter().any(|m| message.contains(m))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NearbyShinsData {
    get_nearby_shins: NearbyShins,
}

#[derive(Debug, Default, Deserialize)]
struct NearbyShins {
    #[serde(default)]
    shins: Option<Vec<ShinNode>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShinNode {
    id: String,
    #[serde(default)]
    amount: i64,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    found_by: Option<FoundBy>,
}

#[derive(Debug, Deserialize)]
struct FoundBy {
    #[serde(default)]
    username: Option<String>,
}

impl From<ShinNode> for Resource {
    fn from(node: ShinNode) -> Self {
        Resource {
            id: node.id,
            lat: node.latitude,
            lon: node.longitude,
            amount: u64::try_from(node.amount).unwrap_or(0),
            claimed_by: node
                .found_by
                .and_then(|f| f.username)
                .filter(|name| !name.is_empty()),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CollectShinInput<'a> {
    id: &'a str,
    user_id: &'a str,
    amount: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetUserData {
    get_user: Option<User>,
}

/// Account profile as returned by `getUser`.
#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub shins: Option<i64>,
}

pub struct ShinnerClient {
    http: Client,
    endpoint: String,
    auth: IdentityProvider,
    session: Mutex<Session>,
}

impl ShinnerClient {
    pub fn new(http: Client, endpoint: impl Into<String>, auth: IdentityProvider, session: Session) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            auth,
            session: Mutex::new(session),
        }
    }

    pub async fn get_user(&self, id: &str) -> Result<User, RemoteError> {
        let data: GetUserData = self.execute("GetUser", GET_USER_QUERY, json!({ "id": id })).await?;
        data.get_user
            .ok_or_else(|| RemoteError::Fatal(format!("GetUser: no user with id {id}")))
    }

    /// The signed-in account's id and username.
    pub async fn identity(&self) -> Result<Identity, RemoteError> {
        let user_id = self.session.lock().await.user_id.clone();
        let user = self.get_user(&user_id).await?;
        info!(username = %user.username, shins = ?user.shins, "resolved account");
        Ok(Identity {
            user_id,
            username: user.username,
        })
    }

    async fn bearer(&self) -> Result<String, RemoteError> {
        let mut session = self.session.lock().await;
        if session.needs_refresh(Instant::now()) {
            info!("bearer token near expiry; refreshing");
            let refreshed = self
                .auth
                .refresh(&session.refresh_token)
                .await
                .map_err(|e| RemoteError::Fatal(format!("token refresh: {e:#}")))?;
            *session = refreshed;
        }
        Ok(session.id_token.clone())
    }

    async fn execute<T: DeserializeOwned>(&self, op: &str, query: &str, variables: Value) -> Result<T, RemoteError> {
        let token = self.bearer().await?;
        let body = json!({ "operationName": op, "query": query, "variables": variables });

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(token)
            .header(header::USER_AGENT, USER_AGENT)
            .header("apollographql-client-name", APOLLO_CLIENT_NAME)
            .json(&body)
            .send()
            .await
            .map_err(|e| RemoteError::Fatal(format!("{op}: {e}")))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| RemoteError::Fatal(format!("{op}: read response: {e}")))?;
        debug!(op, %status, bytes = text.len(), "graphql response");
        decode_response(op, status, &text)
    }
}

#[async_trait]
impl ResourceClient for ShinnerClient {
    async fn query(&self, circle: &Circle) -> Result<Vec<Resource>, RemoteError> {
        let variables = json!({
            "input": {
                "latitude": circle.lat,
                "longitude": circle.lon,
                "radius": circle.radius_km,
            }
        });
        let data: NearbyShinsData = self.execute("GetNearbyShins", NEARBY_SHINS_QUERY, variables).await?;
        Ok(data
            .get_nearby_shins
            .shins
            .unwrap_or_default()
            .into_iter()
            .map(Resource::from)
            .collect())
    }

    async fn claim(&self, resource_id: &str, claimant: &str, amount: u64) -> Result<(), RemoteError> {
        let input = CollectShinInput {
            id: resource_id,
            user_id: claimant,
            amount,
        };
        let _: Value = self
            .execute("CollectShin", COLLECT_SHIN_MUTATION, json!({ "input": input }))
            .await?;
        Ok(())
    }
}

/// Maps one HTTP response onto the operation's data or a classified error.
fn decode_response<T: DeserializeOwned>(op: &str, status: StatusCode, body: &str) -> Result<T, RemoteError> {
    if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE {
        return Err(RemoteError::Overload(format!("{op}: HTTP {status}")));
    }

    let envelope: GraphQlResponse = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        Err(_) if !status.is_success() => return Err(RemoteError::Fatal(format!("{op}: HTTP {status}"))),
        Err(e) => return Err(RemoteError::Fatal(format!("{op}: decode response: {e}"))),
    };

    if !envelope.errors.is_empty() {
        return Err(classify_errors(op, &envelope.errors));
    }
    if !status.is_success() {
        return Err(RemoteError::Fatal(format!("{op}: HTTP {status}")));
    }

    let data = envelope
        .data
        .ok_or_else(|| RemoteError::Fatal(format!("{op}: response carries no data")))?;
    serde_json::from_value(data).map_err(|e| RemoteError::Fatal(format!("{op}: unexpected data: {e}")))
}

fn classify_errors(op: &str, errors: &[GraphQlError]) -> RemoteError {
    let messages = errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ");
    if errors.iter().any(GraphQlError::is_overload) {
        RemoteError::Overload(format!("{op}: {messages}"))
    } else {
        RemoteError::Fatal(format!("{op}: {messages}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nearby(body: &str) -> Result<NearbyShinsData, RemoteError> {
        decode_response("GetNearbyShins", StatusCode::OK, body)
    }

    #[test]
    fn nearby_shins_map_to_resources_in_order() {
        let data = nearby(
            r#"{"data":{"getNearbyShins":{"shins":[
                {"id":"a","amount":5,"latitude":1.5,"longitude":2.5,"found":0,"foundBy":null},
                {"id":"b","amount":2,"latitude":-3.0,"longitude":4.0,"found":17,
                 "foundBy":{"username":"rival","id":"u9","avatar":{"sm":null}}},
                {"id":"c","amount":1,"latitude":0.0,"longitude":0.0,"foundBy":{"username":""}}
            ]}}}"#,
        )
        .unwrap();
        let resources: Vec<Resource> = data
            .get_nearby_shins
            .shins
            .unwrap_or_default()
            .into_iter()
            .map(Resource::from)
            .collect();

        assert_eq!(resources.len(), 3);
        assert_eq!(resources[0].id, "a");
        assert_eq!((resources[0].lat, resources[0].lon, resources[0].amount), (1.5, 2.5, 5));
        assert_eq!(resources[0].claimant(), None);
        assert_eq!(resources[1].claimant(), Some("rival"));
        assert_eq!(resources[2].claimant(), None);
    }

    #[test]
    fn missing_shin_list_is_empty() {
        for body in [
            r#"{"data":{"getNearbyShins":{"shins":null}}}"#,
            r#"{"data":{"getNearbyShins":{}}}"#,
        ] {
            let data = nearby(body).unwrap();
            assert!(data.get_nearby_shins.shins.unwrap_or_default().is_empty());
        }
    }

    #[test]
    fn negative_amounts_are_clamped_to_zero() {
        let node: ShinNode = serde_json::from_str(r#"{"id":"x","amount":-4,"latitude":0,"longitude":0}"#).unwrap();
        assert_eq!(Resource::from(node).amount, 0);
    }

    #[test]
    fn throttling_statuses_are_overload() {
        for status in [StatusCode::TOO_MANY_REQUESTS, StatusCode::SERVICE_UNAVAILABLE] {
            let err = decode_response::<Value>("GetNearbyShins", status, "").unwrap_err();
            assert!(err.is_overload(), "{status}");
        }
    }

    #[test]
    fn other_http_failures_are_fatal() {
        for status in [StatusCode::UNAUTHORIZED, StatusCode::INTERNAL_SERVER_ERROR, StatusCode::BAD_GATEWAY] {
            let err = decode_response::<Value>("GetNearbyShins", status, "<html>nope</html>").unwrap_err();
            assert!(matches!(err, RemoteError::Fatal(_)), "{status}");
        }
    }

    #[test]
    fn rate_limit_graphql_errors_are_overload() {
        let by_code = r#"{"data":null,"errors":[{"message":"slow down","extensions":{"code":"RATE_LIMITED"}}]}"#;
        let by_message = r#"{"errors":[{"message":"Quota exceeded for this project"}]}"#;
        for body in [by_code, by_message] {
            let err = decode_response::<Value>("GetNearbyShins", StatusCode::OK, body).unwrap_err();
            assert!(err.is_overload(), "{body}");
        }
    }

    #[test]
    fn other_graphql_errors_are_fatal_and_keep_the_message() {
        let body = r#"{"errors":[{"message":"Unauthorized","extensions":{"code":"UNAUTHENTICATED"}}]}"#;
        let err = decode_response::<Value>("CollectShin", StatusCode::OK, body).unwrap_err();
        assert_eq!(err, RemoteError::Fatal("CollectShin: Unauthorized".into()));
    }

    #[test]
    fn graphql_errors_on_an_error_status_are_still_classified() {
        let body = r#"{"errors":[{"message":"Too Many Requests"}]}"#;
        let err = decode_response::<Value>("GetNearbyShins", StatusCode::BAD_REQUEST, body).unwrap_err();
        assert!(err.is_overload());
    }

    #[test]
    fn missing_data_is_fatal() {
        let err = decode_response::<Value>("CollectShin", StatusCode::OK, r#"{"data":null}"#).unwrap_err();
        assert!(matches!(err, RemoteError::Fatal(_)));
    }

    #[test]
    fn collect_input_uses_the_wire_field_names() {
        let input = serde_json::to_value(CollectShinInput {
            id: "s1",
            user_id: "u1",
            amount: 3,
        })
        .unwrap();
        assert_eq!(input, json!({ "id": "s1", "userId": "u1", "amount": 3 }));
    }

    #[test]
    fn get_user_decodes_the_profile() {
        let data: GetUserData = decode_response(
            "GetUser",
            StatusCode::OK,
            r#"{"data":{"getUser":{"id":"u1","username":"me","shins":42}}}"#,
        )
        .unwrap();
        let user = data.get_user.unwrap();
        assert_eq!((user.id.as_str(), user.username.as_str(), user.shins), ("u1", "me", Some(42)));
    }
}
