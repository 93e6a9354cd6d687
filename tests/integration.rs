use futures::future::BoxFuture;
use question_bank::ai::QuestionExtractor;
use question_bank::{build_state_with, routes::build_router, state::Config};
use serde_json::{json, Value};
use std::sync::Arc;

struct CannedExtractor(&'static str);

impl QuestionExtractor for CannedExtractor {
    fn extract(&self, _text: &str, _domain: &str) -> BoxFuture<'static, anyhow::Result<String>> {
        let body = self.0.to_string();
        Box::pin(async move { Ok(body) })
    }
}

async fn spawn_server_with(extractor: Arc<dyn QuestionExtractor>) -> (String, reqwest::Client, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let state = build_state_with(Config::for_data_dir(dir.path()), extractor).expect("state");
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = reqwest::Client::builder()
        .cookie_store(true)
        .build()
        .unwrap();
    (format!("http://{}", addr), client, dir)
}

async fn spawn_server() -> (String, reqwest::Client, tempfile::TempDir) {
    spawn_server_with(Arc::new(question_bank::ai::DisabledExtractor)).await
}

fn sample_bank() -> Value {
    json!({
        "version": 2,
        "groups": [
            {
                "id": "net-1",
                "domain": "Network",
                "context": "A branch office connects over a VPN.",
                "questions": [
                    {"id": "n1", "question": "Which layer does IPsec work at?", "choices": ["Network", "Session", "Physical"], "correct_answers": [0]},
                    {"id": "n2", "question": "Which protocol negotiates keys?", "choices": ["IKE", "ARP", "DNS"], "correct_answer": "A"}
                ]
            },
            {
                "id": "crypto-1",
                "domain": "Crypto",
                "questions": [
                    {"id": "c1", "question": "Which are symmetric?", "choices": ["AES", "RSA", "3DES"], "answers": ["A", "C"], "explanation": "RSA is asymmetric"}
                ]
            }
        ]
    })
}

async fn import(base: &str, client: &reqwest::Client, payload: &Value) -> Value {
    let resp = client
        .post(format!("{}/api/v1/import", base))
        .json(payload)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    resp.json().await.unwrap()
}

#[tokio::test]
async fn import_list_edit_export_delete_flow() {
    let (base, client, dir) = spawn_server().await;

    let summary = import(&base, &client, &sample_bank()).await;
    assert_eq!(summary, json!({"imported": 3, "updated": 0}));
    let again = import(&base, &client, &sample_bank()).await;
    assert_eq!(again, json!({"imported": 0, "updated": 3}));

    let page: Value = client
        .get(format!("{}/api/v1/questions?domain=Network&per_page=1", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(page["total"], 2);
    assert_eq!(page["questions"].as_array().unwrap().len(), 1);
    assert_eq!(page["domains"], json!(["Crypto", "Network"]));

    let search: Value = client
        .get(format!("{}/api/v1/questions?q=asymmetric", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(search["total"], 1);
    assert_eq!(search["questions"][0]["correct_answers"], json!([0, 2]));

    let bad_edit = client
        .put(format!("{}/api/v1/questions/n1", base))
        .json(&json!({"question": "Only one choice?", "choices": ["x"], "correct_answers": [0]}))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_edit.status(), 400);
    let body: Value = bad_edit.json().await.unwrap();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let edited: Value = client
        .put(format!("{}/api/v1/questions/n1", base))
        .json(&json!({"question": "Where does IPsec operate?", "choices": ["Network", "Session"], "correct_answer": "A"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(edited["id"], "n1");
    assert_eq!(edited["group_id"], "net-1");

    let renamed = client
        .put(format!("{}/api/v1/groups/crypto-1", base))
        .json(&json!({"domain": "Cryptography"}))
        .send()
        .await
        .unwrap();
    assert_eq!(renamed.status(), 200);

    let export: Value = client
        .get(format!("{}/api/v1/export?groups=crypto-1", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(export["version"], 2);
    assert_eq!(export["groups"].as_array().unwrap().len(), 1);
    assert_eq!(export["groups"][0]["domain"], "Cryptography");

    let deleted: Value = client
        .post(format!("{}/api/v1/questions/delete", base))
        .json(&json!({"ids": ["n1", "n2", "nope"]}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(deleted["deleted"], 2);

    let groups: Value = client
        .get(format!("{}/api/v1/groups", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(groups.as_array().unwrap().len(), 1);

    let gone = client
        .delete(format!("{}/api/v1/groups/net-1", base))
        .send()
        .await
        .unwrap();
    assert_eq!(gone.status(), 404);

    let stored: Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("questions.json")).unwrap()).unwrap();
    assert_eq!(stored["groups"][0]["id"], "crypto-1");
}

#[tokio::test]
async fn unrecognized_import_is_rejected() {
    let (base, client, dir) = spawn_server().await;
    let resp = client
        .post(format!("{}/api/v1/import", base))
        .header("x-request-id", "req-42")
        .json(&json!("just a string"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "FORMAT_ERROR");
    assert_eq!(body["error"]["request_id"], "req-42");

    let scalars = client
        .post(format!("{}/api/v1/import", base))
        .json(&json!([1, 2, "x"]))
        .send()
        .await
        .unwrap();
    assert_eq!(scalars.status(), 400);
    assert!(!dir.path().join("questions.json").exists());
}

#[tokio::test]
async fn transcript_dry_run_then_import() {
    let (base, client, _dir) = spawn_server().await;
    let text = "1. What is X?\nA. foo\nB. bar\n\n2. Pick the odd one\nA. 1\nB. 2\nC. 3\n\nAnswers\n1. A Explanation: because foo\n2. AC";

    let preview: Value = client
        .post(format!("{}/api/v1/import/transcript", base))
        .json(&json!({"text": text, "domain": "Ops", "dry_run": true}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(preview["count"], 2);
    assert_eq!(preview["drafts"][1]["correct_answers"], json!([0, 2]));

    let listed: Value = client
        .get(format!("{}/api/v1/questions", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["total"], 0);

    let summary: Value = client
        .post(format!("{}/api/v1/import/transcript", base))
        .json(&json!({"text": text, "domain": "Ops"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(summary, json!({"imported": 2, "updated": 0}));

    let broken = client
        .post(format!("{}/api/v1/import/transcript", base))
        .json(&json!({"text": "1. Q?\nA. a\nB. b\n2. R?\nA. a\nB. b\nAnswers\n1. A"}))
        .send()
        .await
        .unwrap();
    assert_eq!(broken.status(), 422);
    let body: Value = broken.json().await.unwrap();
    assert_eq!(body["error"]["code"], "TRANSCRIPT_ERROR");

    let empty = client
        .post(format!("{}/api/v1/import/transcript", base))
        .json(&json!({"text": ""}))
        .send()
        .await
        .unwrap();
    assert_eq!(empty.status(), 400);
}

#[tokio::test]
async fn practice_submit_and_review_flow() {
    let (base, client, dir) = spawn_server().await;
    import(&base, &client, &sample_bank()).await;

    let no_test = client
        .get(format!("{}/api/v1/tests/current", base))
        .send()
        .await
        .unwrap();
    assert_eq!(no_test.status(), 404);

    let created: Value = client
        .post(format!("{}/api/v1/tests", base))
        .json(&json!({"domain": "Network"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(created["total"], 2);
    assert!(created["questions"][0].get("correct_answers").is_none());

    let current: Value = client
        .get(format!("{}/api/v1/tests/current", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(current["total"], 2);

    let result: Value = client
        .post(format!("{}/api/v1/tests/submit", base))
        .json(&json!({"answers": {"n1": [0], "n2": [2]}}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(result["correct_count"], 1);
    assert_eq!(result["score"], 50.0);

    let last: Value = client
        .get(format!("{}/api/v1/results/last", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(last["total_questions"], 2);

    let review: Value = client
        .get(format!("{}/api/v1/review", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(review.as_array().unwrap().len(), 1);
    assert_eq!(review[0]["id"], "n2");
    assert_eq!(review[0]["wrong_count"], 1);
    assert_eq!(review[0]["last_answer"], json!([2]));

    let review_test: Value = client
        .post(format!("{}/api/v1/review/tests", base))
        .json(&json!({}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(review_test["mode"], "review");
    assert_eq!(review_test["total"], 1);

    let result: Value = client
        .post(format!("{}/api/v1/tests/submit", base))
        .json(&json!({"answers": {"n2": [0]}}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(result["score"], 100.0);
    let log: Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("wrong_questions.json")).unwrap()).unwrap();
    assert_eq!(log, json!([]));

    let empty_review = client
        .post(format!("{}/api/v1/review/tests", base))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(empty_review.status(), 404);
}

#[tokio::test]
async fn ai_import_validates_and_merges() {
    let fenced = "```json\n{\"groups\": [{\"domain\": \"Ops\", \"context\": \"\", \"questions\": [{\"question\": \"Which backup is fastest to restore?\", \"choices\": [\"Full\", \"Incremental\"], \"correct_answers\": [0]}]}]}\n```";
    let (base, client, _dir) = spawn_server_with(Arc::new(CannedExtractor(fenced))).await;
    let summary: Value = client
        .post(format!("{}/api/v1/import/ai", base))
        .json(&json!({"text": "some pasted text"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(summary, json!({"imported": 1, "updated": 0}));

    let (base, client, _dir) = spawn_server_with(Arc::new(CannedExtractor("{\"groups\": [{\"questions\": []}]}"))).await;
    let resp = client
        .post(format!("{}/api/v1/import/ai", base))
        .json(&json!({"text": "some pasted text"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (base, client, _dir) = spawn_server_with(Arc::new(CannedExtractor("not json"))).await;
    let resp = client
        .post(format!("{}/api/v1/import/ai", base))
        .json(&json!({"text": "some pasted text"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);
}
