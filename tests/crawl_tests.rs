//! Integration tests for the crawl operations
//!
//! These tests run the orchestrator against wiremock servers standing in
//! for the forum, covering the end-to-end pipelines: fetch, parse,
//! persist, and the scheduler's mutual exclusion.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use watchtower::config::{
    AuthConfig, Config, CrawlerConfig, ForumConfig, ScheduleConfig, StorageConfig,
};
use watchtower::crawl::{ActivityIndicator, CrawlKind, Orchestrator};
use watchtower::fetch::FetchClient;
use watchtower::sched::Scheduler;
use watchtower::store::{CacheStore, CharacterUpsert, LinkUpsert, ThreadUpsert};
use watchtower::Category;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config(base_url: &str) -> Config {
    Config {
        forum: ForumConfig {
            base_url: base_url.to_string(),
            complete_forum_id: "49".to_string(),
            incomplete_forum_id: "59".to_string(),
            comms_forum_id: "31".to_string(),
            excluded_forum_ids: vec!["4".to_string()],
            excluded_names: vec!["Watcher".to_string()],
        },
        crawler: CrawlerConfig {
            request_delay_ms: 0,
            max_concurrent_requests: 5,
            fetch_timeout_secs: 10,
            max_retries: 1,
            quote_min_words: 3,
            quote_batch_size: 25,
            webhook_settle_secs: 0,
        },
        schedule: ScheduleConfig::default(),
        storage: StorageConfig {
            database_path: ":memory:".to_string(),
        },
        auth: AuthConfig::default(),
    }
}

fn build_orchestrator(config: Config) -> (Arc<Orchestrator>, Arc<Mutex<CacheStore>>) {
    let config = Arc::new(config);
    let store = Arc::new(Mutex::new(CacheStore::open_in_memory().unwrap()));
    let client = Arc::new(FetchClient::new(&config).unwrap());
    let orchestrator = Arc::new(Orchestrator::new(
        config,
        client,
        store.clone(),
        ActivityIndicator::new(),
    ));
    (orchestrator, store)
}

fn profile_html(name: &str) -> String {
    format!(
        r#"<html>
        <head><title>RP Forum -> Viewing Profile -> {name}</title></head>
        <body>
          <div class="profile-app group-10">
            <h1 class="profile-name">{name}</h1>
            <div class="hero-sq-top" style="background-image: url('https://img.example.com/{name}.png')"></div>
            <dl class="profile-dossier">
              <dt>Age</dt><dd>27</dd>
              <dt>Occupation</dt><dd>Courier</dd>
            </dl>
            <div class="profile-stat">
              <span class="profile-stat-label">INT</span>
              <span class="profile-stat-fill" data-value="5"></span>
            </div>
          </div>
        </body></html>"#,
        name = name
    )
}

fn post_html(user_id: &str, name: &str, body: &str) -> String {
    format!(
        r#"<div class="pr-a">
            <div class="pr-j"><a href="/index.php?showuser={}">{}</a></div>
            <div class="pr-d">Jan 15 2026, 08:30 PM</div>
            <div class="postcolor">{}</div>
        </div>"#,
        user_id, name, body
    )
}

fn thread_page(posts: &[String]) -> String {
    format!(
        "<html><head><title>RP Forum -> The City -> Thread</title></head><body>{}</body></html>",
        posts.join("\n")
    )
}

fn search_result(thread_id: &str, title: &str, forum_id: &str) -> String {
    format!(
        r#"<div class="tableborder">
            <a href="/index.php?showtopic={}">{}</a>
            <a href="/index.php?showforum={}">The City</a>
        </div>"#,
        thread_id, title, forum_id
    )
}

const BOARD_MESSAGE: &str =
    "<html><head><title>RP Forum -> Board Message</title></head><body>wait</body></html>";

async fn mount_profile(server: &MockServer, user_id: &str, name: &str) {
    Mock::given(method("GET"))
        .and(path("/index.php"))
        .and(query_param("showuser", user_id))
        .respond_with(ResponseTemplate::new(200).set_body_string(profile_html(name)))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_profile_crawl_is_idempotent() {
    let server = MockServer::start().await;
    mount_profile(&server, "42", "Scarlet Vane").await;

    let (orchestrator, store) = build_orchestrator(test_config(&server.uri()));

    let report = orchestrator
        .run(CrawlKind::Profile, Some("42"))
        .await
        .unwrap();
    assert_eq!(report.characters, 1);

    let first_fields = {
        let store = store.lock().await;
        store.profile_fields("42").unwrap()
    };
    assert_eq!(first_fields.get("age").map(String::as_str), Some("27"));
    assert_eq!(
        first_fields.get("power grid - int").map(String::as_str),
        Some("5")
    );

    // Second crawl with unchanged source content: identical stored
    // fields, no duplication
    orchestrator
        .run(CrawlKind::Profile, Some("42"))
        .await
        .unwrap();

    let store = store.lock().await;
    assert_eq!(store.profile_fields("42").unwrap(), first_fields);
    assert_eq!(store.character_ids().unwrap(), vec!["42".to_string()]);

    let record = store.get_character("42").unwrap().unwrap();
    assert_eq!(record.name, "Scarlet Vane");
    assert_eq!(record.group_name.as_deref(), Some("Blue"));
    assert!(record.last_profile_crawl.is_some());
}

#[tokio::test]
async fn test_thread_crawl_contains_partial_failures() {
    let server = MockServer::start().await;
    let base = server.uri();

    // Search returns three threads; thread 101's page is stuck on a
    // cooldown response
    let search_html = format!(
        "<html><body>{}{}{}</body></html>",
        search_result("100", "Midnight Run", "12"),
        search_result("101", "Dead Drop", "12"),
        search_result("102", "Long Haul", "12")
    );
    Mock::given(method("GET"))
        .and(path("/index.php"))
        .and(query_param("act", "Search"))
        .respond_with(ResponseTemplate::new(200).set_body_string(search_html))
        .mount(&server)
        .await;

    for (thread_id, last_user, last_name) in
        [("100", "7", "Mirage"), ("102", "42", "Scarlet Vane")]
    {
        // Distinct quote text per thread; identical text would dedup
        let quote_body = format!(
            r#"<b>"You should not have come to thread {}."</b>"#,
            thread_id
        );
        let page = thread_page(&[
            post_html("42", "Scarlet Vane", &quote_body),
            post_html(last_user, last_name, "closing reply"),
        ]);
        Mock::given(method("GET"))
            .and(path("/index.php"))
            .and(query_param("showtopic", thread_id))
            .respond_with(ResponseTemplate::new(200).set_body_string(page))
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/index.php"))
        .and(query_param("showtopic", "101"))
        .respond_with(ResponseTemplate::new(200).set_body_string(BOARD_MESSAGE))
        .mount(&server)
        .await;

    mount_profile(&server, "42", "Scarlet Vane").await;
    mount_profile(&server, "7", "Mirage").await;

    let (orchestrator, store) = build_orchestrator(test_config(&base));
    {
        let mut store = store.lock().await;
        store
            .upsert_character(&CharacterUpsert {
                id: "42".to_string(),
                name: "Scarlet Vane".to_string(),
                profile_url: format!("{}/index.php?showuser=42", base),
                group_id: None,
                group_name: None,
                avatar_url: None,
            })
            .unwrap();
    }

    let report = orchestrator
        .run(CrawlKind::Threads, Some("42"))
        .await
        .unwrap();

    // The cooldown page fails alone; its siblings are persisted
    assert_eq!(report.threads, 2);
    assert!(report.fetch_failures >= 1);

    let store = store.lock().await;
    assert!(store.get_thread("100").unwrap().is_some());
    assert!(store.get_thread("101").unwrap().is_none());
    assert!(store.get_thread("102").unwrap().is_some());

    let thread_100 = store.get_thread("100").unwrap().unwrap();
    assert_eq!(thread_100.category, "ongoing");
    assert_eq!(thread_100.last_poster_name.as_deref(), Some("Mirage"));
    assert_eq!(thread_100.last_poster_id.as_deref(), Some("7"));

    // One post by the character per fetched thread page
    assert_eq!(store.link_post_count("42", "100").unwrap(), Some(1));

    // The bolded quoted line qualifies and was stored once per thread
    assert_eq!(store.quote_count("42").unwrap(), 2);
    assert!(store.is_quote_logged("100").unwrap());
    assert!(store.is_quote_logged("102").unwrap());
    assert!(!store.is_quote_logged("101").unwrap());

    let record = store.get_character("42").unwrap().unwrap();
    assert!(record.last_thread_crawl.is_some());
}

#[tokio::test]
async fn test_thread_recrawl_is_unduplicated_on_second_run() {
    let server = MockServer::start().await;
    let base = server.uri();

    let search_html = format!(
        "<html><body>{}</body></html>",
        search_result("100", "Midnight Run", "12")
    );
    Mock::given(method("GET"))
        .and(path("/index.php"))
        .and(query_param("act", "Search"))
        .respond_with(ResponseTemplate::new(200).set_body_string(search_html))
        .mount(&server)
        .await;

    let page = thread_page(&[post_html(
        "42",
        "Scarlet Vane",
        r#"<b>"Try me, little ghost."</b>"#,
    )]);
    Mock::given(method("GET"))
        .and(path("/index.php"))
        .and(query_param("showtopic", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page))
        .mount(&server)
        .await;
    mount_profile(&server, "42", "Scarlet Vane").await;

    let (orchestrator, store) = build_orchestrator(test_config(&base));
    {
        let mut store = store.lock().await;
        store
            .upsert_character(&CharacterUpsert {
                id: "42".to_string(),
                name: "Scarlet Vane".to_string(),
                profile_url: format!("{}/index.php?showuser=42", base),
                group_id: None,
                group_name: None,
                avatar_url: None,
            })
            .unwrap();
    }

    orchestrator
        .run(CrawlKind::Threads, Some("42"))
        .await
        .unwrap();
    orchestrator
        .run(CrawlKind::Threads, Some("42"))
        .await
        .unwrap();

    let store = store.lock().await;
    // One thread row, one quote row, despite two full crawls
    assert_eq!(store.quote_count("42").unwrap(), 1);
    assert!(store.get_thread("100").unwrap().is_some());
}

#[tokio::test]
async fn test_multi_page_thread_resolves_last_poster_from_final_page() {
    let server = MockServer::start().await;
    let base = server.uri();

    let search_html = format!(
        "<html><body>{}</body></html>",
        search_result("300", "The Long Road", "12")
    );
    Mock::given(method("GET"))
        .and(path("/index.php"))
        .and(query_param("act", "Search"))
        .respond_with(ResponseTemplate::new(200).set_body_string(search_html))
        .mount(&server)
        .await;

    // Specific page mock mounted before the generic one: first match wins
    let page_two = thread_page(&[post_html("7", "Mirage", "the actual last word")]);
    Mock::given(method("GET"))
        .and(path("/index.php"))
        .and(query_param("showtopic", "300"))
        .and(query_param("st", "25"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page_two))
        .mount(&server)
        .await;

    let page_one = format!(
        r#"<html><body>
        <div class="pagination"><a href="/index.php?showtopic=300&st=25">2</a></div>
        {}
        </body></html>"#,
        post_html("42", "Scarlet Vane", "opening post")
    );
    Mock::given(method("GET"))
        .and(path("/index.php"))
        .and(query_param("showtopic", "300"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page_one))
        .mount(&server)
        .await;

    mount_profile(&server, "42", "Scarlet Vane").await;
    mount_profile(&server, "7", "Mirage").await;

    let (orchestrator, store) = build_orchestrator(test_config(&base));
    {
        let mut store = store.lock().await;
        store
            .upsert_character(&CharacterUpsert {
                id: "42".to_string(),
                name: "Scarlet Vane".to_string(),
                profile_url: format!("{}/index.php?showuser=42", base),
                group_id: None,
                group_name: None,
                avatar_url: None,
            })
            .unwrap();
    }

    orchestrator
        .run(CrawlKind::Threads, Some("42"))
        .await
        .unwrap();

    let store = store.lock().await;
    let thread = store.get_thread("300").unwrap().unwrap();
    assert_eq!(thread.last_poster_id.as_deref(), Some("7"));
    assert_eq!(thread.last_poster_name.as_deref(), Some("Mirage"));
}

#[tokio::test]
async fn test_discovery_registers_union_of_pages_once() {
    let server = MockServer::start().await;
    let base = server.uri();

    let member_link = |id: &str, name: &str| {
        format!(r#"<a href="/index.php?showuser={}">{}</a>"#, id, name)
    };
    let pagination = r#"<div class="pagination">
        <a href="/index.php?act=Members&max_results=30&st=30">2</a>
        <a href="/index.php?act=Members&max_results=30&st=60">3</a>
    </div>"#;

    // Specific st pages mounted before the generic first-page mock
    let page_two = format!(
        "<html><body>{}{}</body></html>",
        pagination,
        member_link("203", "Halcyon")
    );
    Mock::given(method("GET"))
        .and(path("/index.php"))
        .and(query_param("act", "Members"))
        .and(query_param("st", "30"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page_two))
        .mount(&server)
        .await;

    let page_three = format!(
        "<html><body>{}{}{}</body></html>",
        pagination,
        member_link("204", "Vesper"),
        member_link("999", "Watcher")
    );
    Mock::given(method("GET"))
        .and(path("/index.php"))
        .and(query_param("act", "Members"))
        .and(query_param("st", "60"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page_three))
        .mount(&server)
        .await;

    let page_one = format!(
        "<html><body>{}{}{}</body></html>",
        pagination,
        member_link("201", "Scarlet Vane"),
        member_link("202", "Mirage")
    );
    Mock::given(method("GET"))
        .and(path("/index.php"))
        .and(query_param("act", "Members"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page_one))
        .mount(&server)
        .await;

    for (id, name) in [
        ("201", "Scarlet Vane"),
        ("202", "Mirage"),
        ("203", "Halcyon"),
        ("204", "Vesper"),
    ] {
        mount_profile(&server, id, name).await;
    }

    let (orchestrator, store) = build_orchestrator(test_config(&base));

    let report = orchestrator.run(CrawlKind::Discovery, None).await.unwrap();
    // Four registered; the excluded staff name is skipped
    assert_eq!(report.registered, 4);
    assert!(report.skipped >= 1);

    {
        let store = store.lock().await;
        let mut ids = store.character_ids().unwrap();
        ids.sort();
        assert_eq!(ids, vec!["201", "202", "203", "204"]);
    }

    // Re-run: nothing new is registered, nothing is duplicated
    let report = orchestrator.run(CrawlKind::Discovery, None).await.unwrap();
    assert_eq!(report.registered, 0);
    assert_eq!(report.already_tracked, 4);

    let store = store.lock().await;
    assert_eq!(store.character_ids().unwrap().len(), 4);
}

#[tokio::test]
async fn test_same_job_type_is_skipped_not_queued() {
    let server = MockServer::start().await;
    let base = server.uri();

    let search_html = "<html><body>no results</body></html>".to_string();
    Mock::given(method("GET"))
        .and(path("/index.php"))
        .and(query_param("act", "Search"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(search_html)
                .set_delay(Duration::from_millis(600)),
        )
        .mount(&server)
        .await;

    let config = Arc::new(test_config(&base));
    let store = Arc::new(Mutex::new(CacheStore::open_in_memory().unwrap()));
    let client = Arc::new(FetchClient::new(&config).unwrap());
    let orchestrator = Arc::new(Orchestrator::new(
        config.clone(),
        client,
        store.clone(),
        ActivityIndicator::new(),
    ));
    let scheduler = Arc::new(Scheduler::new(config, orchestrator));

    // Two concurrent invocations of the same job type: exactly one runs
    tokio::join!(
        scheduler.execute(CrawlKind::Threads, Some("42".to_string())),
        scheduler.execute(CrawlKind::Threads, Some("42".to_string())),
    );

    let search_requests = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|request| request.url.query().unwrap_or("").contains("act=Search"))
        .count();
    assert_eq!(search_requests, 1);
}

#[tokio::test]
async fn test_cooldown_page_is_retried_with_backoff() {
    let server = MockServer::start().await;

    // First response is the cooldown interstitial, then the real page
    Mock::given(method("GET"))
        .and(path("/index.php"))
        .and(query_param("showtopic", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_string(BOARD_MESSAGE))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/index.php"))
        .and(query_param("showtopic", "100"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("<html><body>real page</body></html>"),
        )
        .mount(&server)
        .await;

    let mut config = test_config(&server.uri());
    config.crawler.max_retries = 3;
    let client = FetchClient::new(&Arc::new(config)).unwrap();

    let body = client.fetch("/index.php?showtopic=100").await.unwrap();
    assert!(body.contains("real page"));
}

#[tokio::test]
async fn test_dump_sync_reconciles_posts_and_counts() {
    let server = MockServer::start().await;
    let base = server.uri();

    // Admin login redirects with the session token
    Mock::given(method("GET"))
        .and(path("/admin.php"))
        .and(query_param("login", "yes"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("location", "/admin.php?adsess=0123abcd&code=ok"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/admin.php"))
        .and(query_param("code", "backup"))
        .respond_with(ResponseTemplate::new(200).set_body_string("cleared"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/admin.php"))
        .and(query_param("step1", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("initialized"))
        .mount(&server)
        .await;
    // Each table part finishes on its first page (no next-page link)
    Mock::given(method("GET"))
        .and(path("/admin.php"))
        .and(query_param("code", "dump"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>part done</html>"))
        .mount(&server)
        .await;

    // Post columns: author at 3, name at 4, date at 8, topic at 12,
    // forum at 13; one row belongs to an untracked member
    let sql = [
        "-- watchtower test dump, padded to look like a real export file",
        "REPLACE INTO `ibf_posts` VALUES (1,0,0,42,'Scarlet Vane',0,0,0,1736899800,0,'<p>a</p>',0,100,12);",
        "REPLACE INTO `ibf_posts` VALUES (2,0,0,42,'Scarlet Vane',0,0,0,1736986200,0,'<p>b</p>',0,100,12);",
        "REPLACE INTO `ibf_posts` VALUES (3,0,0,42,'Scarlet Vane',0,0,0,1737072600,0,'<p>c</p>',0,100,12);",
        "REPLACE INTO `ibf_posts` VALUES (4,0,0,99,'Stranger',0,0,0,1737072600,0,'<p>d</p>',0,100,12);",
        "REPLACE INTO `ibf_topics` VALUES (100,'Midnight Run',0,1,0,0,0,7,1737072600,0,0,'Mirage',0,0,0,12);",
    ]
    .join("\n");
    // The forum host label of 127.0.0.1 is its first dotted segment
    Mock::given(method("GET"))
        .and(path("/sqls/0123abcd-127_.sql"))
        .respond_with(ResponseTemplate::new(200).set_body_string(sql))
        .mount(&server)
        .await;

    let mut config = test_config(&base);
    config.auth.admin_username = Some("admin".to_string());
    config.auth.admin_password = Some("secret".to_string());

    let (orchestrator, store) = build_orchestrator(config);
    {
        let mut store = store.lock().await;
        store
            .upsert_character(&CharacterUpsert {
                id: "42".to_string(),
                name: "Scarlet Vane".to_string(),
                profile_url: format!("{}/index.php?showuser=42", base),
                group_id: None,
                group_name: None,
                avatar_url: None,
            })
            .unwrap();
        store
            .upsert_thread(&ThreadUpsert {
                id: "100".to_string(),
                title: "Midnight Run".to_string(),
                url: format!("{}/index.php?showtopic=100", base),
                forum_id: Some("12".to_string()),
                forum_name: Some("The City".to_string()),
                category: Category::Ongoing,
                last_poster_id: None,
                last_poster_name: None,
                last_poster_avatar: None,
            })
            .unwrap();
        store
            .link_character_thread(&LinkUpsert {
                character_id: "42".to_string(),
                thread_id: "100".to_string(),
                category: Category::Ongoing,
                is_last_poster: false,
                post_count: 1,
            })
            .unwrap();
    }

    let report = orchestrator.run(CrawlKind::DumpSync, None).await.unwrap();
    assert_eq!(report.posts_synced, 3);

    let store = store.lock().await;
    assert_eq!(store.post_count_for_thread("100").unwrap(), 3);
    assert_eq!(store.link_post_count("42", "100").unwrap(), Some(3));

    // Authoritative last-poster refresh from the topics table
    let thread = store.get_thread("100").unwrap().unwrap();
    assert_eq!(thread.last_poster_id.as_deref(), Some("7"));
    assert_eq!(thread.last_poster_name.as_deref(), Some("Mirage"));

    assert!(store.state_get("last_dump_sync").unwrap().is_some());
}

#[tokio::test]
async fn test_dump_sync_without_credentials_is_rejected() {
    let server = MockServer::start().await;
    let (orchestrator, _store) = build_orchestrator(test_config(&server.uri()));

    let result = orchestrator.run(CrawlKind::DumpSync, None).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_tracker_surface_acknowledges_immediately() {
    let server = MockServer::start().await;
    let tracker = watchtower::Tracker::with_store(
        test_config(&server.uri()),
        CacheStore::open_in_memory().unwrap(),
    )
    .unwrap();

    // Idle until something crawls
    assert!(tracker.read_activity().is_none());

    // Registration is idempotent
    assert!(tracker.register("42").await.unwrap());
    assert!(!tracker.register("42").await.unwrap());

    // Unknown crawl types are rejected synchronously; known ones are
    // acknowledged with their echo immediately
    assert!(tracker.trigger_crawl("everything", None).is_err());
    assert_eq!(tracker.trigger_crawl("quotes", None).unwrap(), "quotes");

    // Event resolution returns the action name without blocking on the
    // resulting crawl
    assert_eq!(
        tracker.submit_event("profile_edit", None, None, Some("42")),
        "profile_crawl"
    );
    assert_eq!(
        tracker.submit_event("new_post", Some("789"), Some("30"), None),
        "thread_recrawl"
    );
    assert_eq!(
        tracker.submit_event("new_topic", None, None, Some("42")),
        "full_thread_crawl"
    );
    assert_eq!(tracker.submit_event("new_post", None, None, None), "none");
    assert_eq!(
        tracker.submit_event("member_banned", None, None, Some("42")),
        "none"
    );
}

#[tokio::test]
async fn test_register_is_idempotent() {
    let server = MockServer::start().await;
    let (orchestrator, store) = build_orchestrator(test_config(&server.uri()));

    assert!(orchestrator.register("42").await.unwrap());
    assert!(!orchestrator.register("42").await.unwrap());

    let store = store.lock().await;
    assert_eq!(store.character_ids().unwrap(), vec!["42".to_string()]);
}
