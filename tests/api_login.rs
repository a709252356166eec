mod common;

use common::TestApp;

async fn login(app: &TestApp, username: &str, password: &str) -> reqwest::Response {
    app.client
        .post(app.url("/login"))
        .form(&[("username", username), ("password", password)])
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_student_login() {
    let app = TestApp::start(None).await;

    let resp = login(&app, "SV001", "SV001").await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "success");
    assert_eq!(body["role"], "student");
    assert_eq!(body["student_id"], "SV001");
}

#[tokio::test]
async fn test_teacher_login_has_no_student_id() {
    let app = TestApp::start(None).await;

    let resp = login(&app, "teacher", "secret").await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["role"], "teacher");
    assert!(body["student_id"].is_null());
}

#[tokio::test]
async fn test_wrong_password_and_unknown_user() {
    let app = TestApp::start(None).await;

    let resp = login(&app, "SV001", "wrong").await;
    assert_eq!(resp.status(), 401);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "failed");

    let resp = login(&app, "nobody", "nobody").await;
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = TestApp::start(Some(vec![1.0, 0.0, 0.0])).await;

    let resp = app.client.get(app.url("/health")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], "SQLite");
    assert!(body["version"].is_string());
    assert_eq!(body["templates"], 3);
    assert_eq!(body["students_with_templates"], 2);
    assert_eq!(body["face_model_loaded"], true);
}
