//! Person matching over the HTTP client

use chrono::NaiveDate;
use pco_sdk_client::{AuthConfig, ClientConfig, PcoClient};
use pco_sdk_matching::{MatchCriteria, PersonMatcher};
use pco_sdk_monitoring::EventType;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> PcoClient {
    PcoClient::new(
        ClientConfig::new(AuthConfig::personal_access_token("app", "secret"))
            .with_base_url(format!("{}/people/v2", server.uri())),
    )
    .unwrap()
}

fn people(data: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"data": data, "meta": {"total_count": 1}}))
}

#[tokio::test]
async fn test_match_over_http_with_failing_phone_search() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/people/v2/people"))
        .and(query_param("where[search_name_or_email]", "ada@example.com"))
        .respond_with(people(json!([
            {
                "type": "Person",
                "id": "11",
                "attributes": {"first_name": "Ada", "last_name": "Lovelace"}
            }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/people/v2/people"))
        .and(query_param("where[search_phone_number]", "5550100199"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/people/v2/people"))
        .and(query_param("where[first_name]", "ada"))
        .respond_with(people(json!([
            {
                "type": "Person",
                "id": "11",
                "attributes": {"first_name": "Ada", "last_name": "Lovelace"}
            }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let found_events = Arc::new(AtomicUsize::new(0));
    let counter = found_events.clone();
    client.events().on(EventType::MatchFound, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let criteria = MatchCriteria::new()
        .first_name("Ada")
        .email("ada@example.com")
        .phone("555-010-0199");
    let found = PersonMatcher::for_client(&client)
        .with_today(NaiveDate::from_ymd_opt(2024, 6, 15).unwrap())
        .find_match(&criteria)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(found.person.id, "11");
    // (0.35 + 0 + 0.2 * 0.5 + 0.15 * 0.5) / 0.95
    assert!((found.score - 0.525 / 0.95).abs() < 1e-9);
    assert_eq!(found_events.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_find_or_create_posts_person_and_contacts() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/people/v2/people"))
        .respond_with(people(json!([])))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/people/v2/people"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "data": {
                "type": "Person",
                "id": "77",
                "attributes": {"first_name": "Grace", "last_name": "Hopper"}
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/people/v2/people/77/emails"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "data": {"type": "Email", "id": "5", "attributes": {"address": "grace@example.com"}}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let criteria = MatchCriteria::new()
        .first_name("Grace")
        .last_name("Hopper")
        .email("grace@example.com");
    let person = PersonMatcher::for_client(&client(&server))
        .find_or_create(&criteria)
        .await
        .unwrap();

    assert_eq!(person.id, "77");
}
