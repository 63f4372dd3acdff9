use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use sqlx::SqlitePool;

use synopsis::auth::{AccessGate, Caller, Role, TokenSigner, SUMMARY_ACTION};
use synopsis::error::{AuthError, ExternalError, GenerateError, PipelineError};
use synopsis::llm::{ExternalEndpoint, ExternalSummarizer};
use synopsis::pipeline::GenerationRequest;
use synopsis::service::{RenderContext, SaveForm, SaveOutcome, SummaryService};
use synopsis::settings::GenerationSettings;

/// External summarizer double with a fixed reply and a call counter.
struct FixedSummarizer {
    reply: Result<String, ExternalError>,
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl ExternalSummarizer for FixedSummarizer {
    async fn summarize(
        &self,
        _content: &str,
        _target_words: usize,
        _endpoint: &ExternalEndpoint,
    ) -> Result<String, ExternalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reply.clone()
    }
}

struct Fixture {
    pool: SqlitePool,
    signer: Arc<TokenSigner>,
    external: Arc<FixedSummarizer>,
    service: SummaryService,
    author: Caller,
    other_author: Caller,
}

async fn setup(reply: Result<String, ExternalError>) -> Fixture {
    let pool = common::init_memory_pool().await.expect("pool");
    let signer = Arc::new(TokenSigner::new(b"service-test", 600, 600));
    let external = Arc::new(FixedSummarizer {
        reply,
        calls: AtomicUsize::new(0),
    });
    let service = SummaryService::new(
        pool.clone(),
        AccessGate::new(signer.clone()),
        external.clone(),
    );

    let mut ids = Vec::new();
    for name in ["alice", "bob"] {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO users (username, role) VALUES (?, 'author') RETURNING id",
        )
        .bind(name)
        .fetch_one(&pool)
        .await
        .expect("insert user");
        ids.push(id);
    }

    Fixture {
        pool,
        signer,
        external,
        service,
        author: Caller::user(ids[0], Role::Author),
        other_author: Caller::user(ids[1], Role::Author),
    }
}

fn request(fx: &Fixture, caller: &Caller, item_id: i64, supplied: Option<&str>) -> GenerationRequest {
    let token = fx
        .signer
        .issue(caller.user_id.expect("user"), SUMMARY_ACTION)
        .expect("token");
    GenerationRequest {
        content_item_id: item_id,
        caller: caller.clone(),
        anti_forgery_token: token,
        supplied_content: supplied.map(str::to_owned),
    }
}

async fn enable_external(fx: &Fixture, length: i64) {
    fx.service
        .settings()
        .save(&GenerationSettings {
            summary_length: length,
            external_api_key: "key".into(),
            external_api_url: "https://llm.example/v1beta/models/flash".into(),
        })
        .await
        .expect("save settings");
}

#[tokio::test]
async fn generate_persists_local_summary() {
    let fx = setup(Ok(String::new())).await;
    let body = (1..=60).map(|i| format!("word{i}")).collect::<Vec<_>>().join(" ");
    let item = fx
        .service
        .content()
        .create(fx.author.user_id.unwrap(), "Thread", &format!("<p>{body}</p>"))
        .await
        .expect("create");

    let summary = fx
        .service
        .on_generate_request(request(&fx, &fx.author, item.id, None))
        .await
        .expect("generate");

    assert_eq!(summary.split_whitespace().count(), 40);
    assert!(summary.starts_with("word1 word2"));
    assert!(summary.ends_with('\u{2026}'));
    assert_eq!(fx.external.calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        fx.service.summaries().get(item.id).await.expect("get"),
        Some(summary)
    );
}

#[tokio::test]
async fn regeneration_overwrites() {
    let fx = setup(Ok(String::new())).await;
    let item = fx
        .service
        .content()
        .create(fx.author.user_id.unwrap(), "Thread", "original body")
        .await
        .expect("create");

    fx.service
        .on_generate_request(request(&fx, &fx.author, item.id, None))
        .await
        .expect("first");
    fx.service
        .on_generate_request(request(&fx, &fx.author, item.id, Some("edited draft text")))
        .await
        .expect("second");

    assert_eq!(
        fx.service.summaries().get(item.id).await.expect("get").as_deref(),
        Some("edited draft text")
    );
    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM content_summaries WHERE content_id = ?")
        .bind(item.id)
        .fetch_one(&fx.pool)
        .await
        .expect("count");
    assert_eq!(rows, 1);
}

#[tokio::test]
async fn external_reply_is_trimmed_to_length() {
    let fx = setup(Ok("Hello world".into())).await;
    enable_external(&fx, 1).await;
    let item = fx
        .service
        .content()
        .create(fx.author.user_id.unwrap(), "Thread", "body")
        .await
        .expect("create");

    let summary = fx
        .service
        .on_generate_request(request(&fx, &fx.author, item.id, None))
        .await
        .expect("generate");

    assert_eq!(summary, "Hello\u{2026}");
    assert_eq!(fx.external.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn empty_external_reply_leaves_no_record() {
    let fx = setup(Ok(String::new())).await;
    enable_external(&fx, 40).await;
    let item = fx
        .service
        .content()
        .create(fx.author.user_id.unwrap(), "Thread", "body with words")
        .await
        .expect("create");
    fx.service.summaries().put(item.id, "stale").await.expect("seed");

    let summary = fx
        .service
        .on_generate_request(request(&fx, &fx.author, item.id, None))
        .await
        .expect("generate");

    assert_eq!(summary, "");
    assert_eq!(fx.external.calls.load(Ordering::SeqCst), 1);
    assert_eq!(fx.service.summaries().get(item.id).await.expect("get"), None);
}

#[tokio::test]
async fn transport_failure_stores_nothing() {
    let fx = setup(Err(ExternalError::Transport("connection reset".into()))).await;
    enable_external(&fx, 40).await;
    let item = fx
        .service
        .content()
        .create(fx.author.user_id.unwrap(), "Thread", "body")
        .await
        .expect("create");
    fx.service.summaries().put(item.id, "previous").await.expect("seed");

    let err = fx
        .service
        .on_generate_request(request(&fx, &fx.author, item.id, None))
        .await
        .expect_err("should fail");

    assert_eq!(err.status_code(), 500);
    assert!(err.to_string().contains("connection reset"));
    assert_eq!(
        fx.service.summaries().get(item.id).await.expect("get").as_deref(),
        Some("previous")
    );
}

#[tokio::test]
async fn missing_item_is_not_found() {
    let fx = setup(Ok(String::new())).await;
    let err = fx
        .service
        .on_generate_request(request(&fx, &fx.author, 999, None))
        .await
        .expect_err("should fail");

    assert!(matches!(err, GenerateError::Pipeline(PipelineError::NotFound)));
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn foreign_item_is_invalid_target() {
    let fx = setup(Ok(String::new())).await;
    let item = fx
        .service
        .content()
        .create(fx.author.user_id.unwrap(), "Thread", "body")
        .await
        .expect("create");

    let err = fx
        .service
        .on_generate_request(request(&fx, &fx.other_author, item.id, None))
        .await
        .expect_err("should fail");

    assert!(matches!(err, GenerateError::Auth(AuthError::InvalidTarget)));
    assert_eq!(err.status_code(), 403);
    assert_eq!(fx.service.summaries().get(item.id).await.expect("get"), None);
}

#[tokio::test]
async fn anonymous_caller_is_unauthorized_before_lookup() {
    let fx = setup(Ok(String::new())).await;
    let req = GenerationRequest {
        content_item_id: 999,
        caller: Caller::anonymous(),
        anti_forgery_token: "bogus".into(),
        supplied_content: None,
    };
    let err = fx.service.on_generate_request(req).await.expect_err("should fail");
    assert!(matches!(err, GenerateError::Auth(AuthError::Unauthorized)));
}

#[tokio::test]
async fn save_hook_sanitizes_and_clears() {
    let fx = setup(Ok(String::new())).await;
    let item = fx
        .service
        .content()
        .create(fx.author.user_id.unwrap(), "Thread", "body")
        .await
        .expect("create");
    let token = fx
        .signer
        .issue(fx.author.user_id.unwrap(), SUMMARY_ACTION)
        .expect("token");

    let outcome = fx
        .service
        .on_save(
            &fx.author,
            item.id,
            &SaveForm {
                anti_forgery_token: Some(token.clone()),
                summary_field: Some("<b>Hand</b> written\nsummary".into()),
            },
        )
        .await
        .expect("save");
    assert_eq!(outcome, SaveOutcome::Stored("Hand written summary".into()));

    let outcome = fx
        .service
        .on_save(
            &fx.author,
            item.id,
            &SaveForm {
                anti_forgery_token: Some(token.clone()),
                summary_field: None,
            },
        )
        .await
        .expect("save");
    assert_eq!(outcome, SaveOutcome::Unchanged);

    let outcome = fx
        .service
        .on_save(
            &fx.author,
            item.id,
            &SaveForm {
                anti_forgery_token: Some(token),
                summary_field: Some("   ".into()),
            },
        )
        .await
        .expect("save");
    assert_eq!(outcome, SaveOutcome::Cleared);
    assert_eq!(fx.service.summaries().get(item.id).await.expect("get"), None);
}

#[tokio::test]
async fn save_hook_ignores_bad_token_and_foreign_items() {
    let fx = setup(Ok(String::new())).await;
    let item = fx
        .service
        .content()
        .create(fx.author.user_id.unwrap(), "Thread", "body")
        .await
        .expect("create");

    let outcome = fx
        .service
        .on_save(
            &fx.author,
            item.id,
            &SaveForm {
                anti_forgery_token: Some("forged".into()),
                summary_field: Some("text".into()),
            },
        )
        .await
        .expect("save");
    assert_eq!(outcome, SaveOutcome::Rejected(AuthError::InvalidToken));

    let other_token = fx
        .signer
        .issue(fx.other_author.user_id.unwrap(), SUMMARY_ACTION)
        .expect("token");
    let outcome = fx
        .service
        .on_save(
            &fx.other_author,
            item.id,
            &SaveForm {
                anti_forgery_token: Some(other_token),
                summary_field: Some("text".into()),
            },
        )
        .await
        .expect("save");
    assert_eq!(outcome, SaveOutcome::Rejected(AuthError::InvalidTarget));
    assert_eq!(fx.service.summaries().get(item.id).await.expect("get"), None);
}

#[tokio::test]
async fn render_appends_only_on_singular_view() {
    let fx = setup(Ok(String::new())).await;
    let item = fx
        .service
        .content()
        .create(fx.author.user_id.unwrap(), "Thread", "body")
        .await
        .expect("create");

    assert_eq!(
        fx.service
            .on_render_content(&item, RenderContext::singular())
            .await
            .expect("render"),
        None
    );

    fx.service.summaries().put(item.id, "A & B").await.expect("put");

    let block = fx
        .service
        .on_render_content(&item, RenderContext::singular())
        .await
        .expect("render")
        .expect("block");
    assert!(block.contains("<p>A &amp; B</p>"));

    assert_eq!(
        fx.service
            .on_render_content(&item, RenderContext::listing())
            .await
            .expect("render"),
        None
    );
    let secondary = RenderContext {
        singular: true,
        main_query: false,
    };
    assert_eq!(
        fx.service.on_render_content(&item, secondary).await.expect("render"),
        None
    );
}
