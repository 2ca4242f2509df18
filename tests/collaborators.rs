use chrono::Utc;
use crmbridge::collaborators::{
    ActivityRecord, ChatApi, ChatClient, ContactRecord, CrmApi, CrmClient,
};
use wiremock::matchers::{body_json_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn contact() -> ContactRecord {
    ContactRecord {
        external_id: "contact-9".into(),
        name: Some("Ada".into()),
        email: Some("ada@example.com".into()),
        phone: None,
    }
}

#[tokio::test]
async fn crm_upsert_contact_sends_bearer_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/contacts/upsert"))
        .and(header("Authorization", "Bearer crm-token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = CrmClient::new(&server.uri(), "crm-token".into()).unwrap();
    client.upsert_contact(&contact()).await.unwrap();
}

#[tokio::test]
async fn crm_append_activity_targets_the_contact() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/contacts/contact-9/activities"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let client = CrmClient::new(&server.uri(), "crm-token".into()).unwrap();
    client
        .append_activity(&ActivityRecord {
            contact_external_id: "contact-9".into(),
            kind: "message".into(),
            body: "Ada: hello".into(),
            occurred_at: Utc::now(),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn crm_outage_classifies_as_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/contacts/upsert"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let client = CrmClient::new(&server.uri(), "crm-token".into()).unwrap();
    let error = client.upsert_contact(&contact()).await.unwrap_err();
    assert!(error.is_transient());
    assert_eq!(error.status(), Some(503));
    assert!(error.to_string().contains("maintenance"));
}

#[tokio::test]
async fn crm_validation_failure_classifies_as_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/contacts/upsert"))
        .respond_with(ResponseTemplate::new(422).set_body_string("email malformed"))
        .mount(&server)
        .await;

    let client = CrmClient::new(&server.uri(), "crm-token".into()).unwrap();
    let error = client.upsert_contact(&contact()).await.unwrap_err();
    assert!(!error.is_transient());
    assert_eq!(error.status(), Some(422));
}

#[tokio::test]
async fn crm_throttling_classifies_as_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/contacts/upsert"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let client = CrmClient::new(&server.uri(), "crm-token".into()).unwrap();
    let error = client.upsert_contact(&contact()).await.unwrap_err();
    assert!(error.is_transient());
}

#[tokio::test]
async fn chat_fetch_conversation_parses_the_contact() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/conversations/c1"))
        .and(header("Authorization", "Bearer chat-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "c1",
            "status": "open",
            "contact": {
                "external_id": "contact-9",
                "name": "Ada",
                "email": "ada@example.com"
            }
        })))
        .mount(&server)
        .await;

    let client = ChatClient::new(&server.uri(), "chat-token".into()).unwrap();
    let conversation = client.fetch_conversation("c1").await.unwrap();
    assert_eq!(conversation.id, "c1");
    assert_eq!(conversation.status, "open");
    assert_eq!(conversation.contact.external_id, "contact-9");
    assert_eq!(conversation.contact.phone, None);
}

#[tokio::test]
async fn chat_missing_conversation_is_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/conversations/gone"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .mount(&server)
        .await;

    let client = ChatClient::new(&server.uri(), "chat-token".into()).unwrap();
    let error = client.fetch_conversation("gone").await.unwrap_err();
    assert!(!error.is_transient());
    assert_eq!(error.status(), Some(404));
}

#[tokio::test]
async fn chat_fetch_message_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/conversations/c1/messages/m1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "m1",
            "conversation_id": "c1",
            "sender": "Ada",
            "body": "hello there"
        })))
        .mount(&server)
        .await;

    let client = ChatClient::new(&server.uri(), "chat-token".into()).unwrap();
    let message = client.fetch_message("c1", "m1").await.unwrap();
    assert_eq!(message.sender, "Ada");
    assert_eq!(message.body, "hello there");
}

#[tokio::test]
async fn chat_malformed_body_is_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/conversations/c1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let client = ChatClient::new(&server.uri(), "chat-token".into()).unwrap();
    let error = client.fetch_conversation("c1").await.unwrap_err();
    assert!(!error.is_transient());
    assert!(error.to_string().contains("malformed response body"));
}

// Keep the serializer honest: the CRM receives exactly the contact we hold.
#[tokio::test]
async fn crm_upsert_body_matches_the_record() {
    let server = MockServer::start().await;
    let expected = serde_json::json!({
        "external_id": "contact-9",
        "name": "Ada",
        "email": "ada@example.com",
        "phone": null
    });
    Mock::given(method("POST"))
        .and(path("/contacts/upsert"))
        .and(body_json_string(expected.to_string()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = CrmClient::new(&server.uri(), "crm-token".into()).unwrap();
    client.upsert_contact(&contact()).await.unwrap();
}
