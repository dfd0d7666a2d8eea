use super::*;
use crate::proto::OsFamily;
use tokio::runtime as rt;

fn test_client(server_url: &str) -> Client {
    ClientBuilder::new(
        Url::parse(server_url).unwrap(),
        Uuid::nil(),
        "initial-token".to_string(),
    )
    .build()
    .unwrap()
}

#[test]
fn test_check_in_claims_commands() {
    let runtime = rt::Runtime::new().unwrap();
    runtime.block_on(async {
        let mut server = mockito::Server::new_async().await;
        let body = r#"{
            "commands": [
                {"id": "00000000-0000-0000-0000-000000000001",
                 "command_type": "scan_updates",
                 "params": {},
                 "created_at": "2026-01-10T12:00:00Z"}
            ],
            "check_in_interval": 300
        }"#;
        let mock = server
            .mock(
                "POST",
                "/api/v1/agents/00000000-0000-0000-0000-000000000000/commands",
            )
            .match_header("authorization", "Bearer initial-token")
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;

        let client = test_client(&server.url());
        let resp = client.check_in(&CheckInRequest::default()).await.unwrap();
        mock.assert_async().await;

        assert_eq!(resp.commands.len(), 1);
        assert_eq!(resp.commands[0].command_type, "scan_updates");
        assert_eq!(resp.check_in_interval, 300);
    });
}

#[test]
fn test_check_in_unauthorized() {
    let runtime = rt::Runtime::new().unwrap();
    runtime.block_on(async {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock(
                "POST",
                "/api/v1/agents/00000000-0000-0000-0000-000000000000/commands",
            )
            .with_status(401)
            .with_body(r#"{"code":"unauthorized","message":"unauthorized"}"#)
            .create_async()
            .await;

        let client = test_client(&server.url());
        let err = client
            .check_in(&CheckInRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentClientError::Unauthorized));
        assert!(!err.is_transient());
    });
}

#[test]
fn test_renew_replaces_token() {
    let runtime = rt::Runtime::new().unwrap();
    runtime.block_on(async {
        let mut server = mockito::Server::new_async().await;
        let _renew = server
            .mock(
                "POST",
                "/api/v1/agents/00000000-0000-0000-0000-000000000000/renew",
            )
            .with_status(200)
            .with_body(r#"{"access_token": "fresh-token", "expires_in": 86400}"#)
            .create_async()
            .await;
        let check_in = server
            .mock(
                "POST",
                "/api/v1/agents/00000000-0000-0000-0000-000000000000/commands",
            )
            .match_header("authorization", "Bearer fresh-token")
            .with_status(200)
            .with_body(r#"{"commands": [], "check_in_interval": 300}"#)
            .create_async()
            .await;

        let client = test_client(&server.url());
        client.renew("refresh-secret").await.unwrap();
        let resp = client.check_in(&CheckInRequest::default()).await.unwrap();
        check_in.assert_async().await;
        assert!(resp.commands.is_empty());
    });
}

#[test]
fn test_remote_error_decoded() {
    let runtime = rt::Runtime::new().unwrap();
    runtime.block_on(async {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock(
                "POST",
                "/api/v1/agents/00000000-0000-0000-0000-000000000000/system-info",
            )
            .with_status(404)
            .with_body(r#"{"code":"not_found","message":"host not found"}"#)
            .create_async()
            .await;

        let client = test_client(&server.url());
        let err = client
            .report_system_info(&SystemInfoRequest::default())
            .await
            .unwrap_err();
        match err {
            AgentClientError::Remote(status, body) => {
                assert_eq!(status.as_u16(), 404);
                assert_eq!(body.code, "not_found");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    });
}

#[test]
fn test_register_roundtrip() {
    let runtime = rt::Runtime::new().unwrap();
    runtime.block_on(async {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/v1/agents/register")
            .with_status(200)
            .with_body(
                r#"{"agent_id": "00000000-0000-0000-0000-000000000042",
                    "access_token": "at", "refresh_token": "rt",
                    "check_in_interval": 300}"#,
            )
            .create_async()
            .await;

        let req = RegisterRequest {
            token: "aa".repeat(32),
            hostname: "h1".to_string(),
            os_type: OsFamily::Linux,
            os_version: String::new(),
            architecture: String::new(),
            agent_version: String::new(),
        };
        let resp = register(&Url::parse(&server.url()).unwrap(), &req)
            .await
            .unwrap();
        assert_eq!(
            resp.agent_id.to_string(),
            "00000000-0000-0000-0000-000000000042"
        );
        assert_eq!(resp.check_in_interval, 300);
    });
}

#[test]
fn test_server_error_is_transient() {
    let err = AgentClientError::Http(StatusCode::BAD_GATEWAY);
    assert!(err.is_transient());
    assert_eq!(err.error_kind(), "generic_http");

    let err = AgentClientError::Http(StatusCode::CONFLICT);
    assert!(!err.is_transient());
}
