use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use switchboard_sdk::{
    failure, success, Application, Component, ControllerOptions, HttpError, MemoryDataSource, Message, MethodOptions,
    Middleware, ParamKind, ParameterBinding, Reply, ServerConfig,
};
use tower::ServiceExt;

#[derive(Default)]
struct Calc {
    calls: AtomicUsize,
}

impl Component for Calc {
    fn name() -> &'static str {
        "Calc"
    }
}

#[derive(Default, Serialize, Deserialize)]
struct Transfer {
    amount: u64,
    currency: String,
}

fn application() -> Application {
    Application::new(ServerConfig::default()).with_data_source(Arc::new(MemoryDataSource::new()))
}

async fn calc_router() -> Router {
    let mut app = application();
    app.controller(Calc::default(), ControllerOptions::new(["/c"]).error_code(Some(StatusCode::NOT_FOUND)))
        .unwrap()
        .path_variable("id", "double", |_c: Arc<Calc>, raw: String, _name: String| async move {
            let n: i64 = raw.parse().map_err(|_| HttpError::bad_request("id must be a number"))?;
            Ok::<_, HttpError>(json!(n * 2))
        })
        .method("show", MethodOptions::get("/:id"), |c, args| {
            c.calls.fetch_add(1, Ordering::SeqCst);
            let id: i64 = args.get(0)?;
            Ok(Reply::resolved(json!({ "id": id })))
        })
        .param("show", ParameterBinding::path_variable(0, "id"))
        .method("ordered", MethodOptions::get("/ordered/list"), |_c, args| {
            Ok(Reply::immediate(Value::Array(args.into_inner())))
        })
        .param("ordered", ParameterBinding::query(2, "c"))
        .param("ordered", ParameterBinding::query(0, "a"))
        .param("ordered", ParameterBinding::query(1, "b"))
        .method("find", MethodOptions::get("/find/one"), |_c, args| {
            let q: Option<String> = args.get(0)?;
            Ok(Reply::deferred(async move {
                match q.as_deref() {
                    Some("known") => success(Message::new("Found", "Record found"), json!({ "name": "known" })),
                    _ => Err(HttpError::msg("missing")),
                }
            }))
        })
        .param("find", ParameterBinding::query(0, "q"))
        .method("transfer", MethodOptions::post("/transfer"), |_c, args| {
            let t: Transfer = args.get(0)?;
            let agent: Option<String> = args.get(1)?;
            Ok(Reply::resolved(json!({ "amount": t.amount, "currency": t.currency, "agent": agent })))
        })
        .param("transfer", ParameterBinding::header(1, "User-Agent"))
        .param("transfer", ParameterBinding::body::<Transfer>(0))
        .method("text", MethodOptions::get("/text/plain"), |_c, _args| Ok(Reply::immediate("pong")))
        .method("echo", MethodOptions::all("/echo/any"), |_c, args| {
            Ok(Reply::immediate(json!({ "method": args.value(0), "path": args.value(1) })))
        })
        .param("echo", ParameterBinding::at(0, ParamKind::HttpRequest, ["req", "method"]))
        .param("echo", ParameterBinding::at(1, ParamKind::HttpRequest, ["req", "path"]))
        .method("boom", MethodOptions::get("/boom/now"), |_c, _args| {
            Err(HttpError::msg("handler exploded"))
        });
    app.build().await.unwrap().router()
}

async fn call(router: Router, req: Request<Body>) -> (StatusCode, Value) {
    let res: Response = router.oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn path_variable_is_transformed_before_the_handler() {
    let (status, body) = call(calc_router().await, get("/v1/c/21")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "id": 42 }));
}

#[tokio::test]
async fn failed_transform_short_circuits() {
    let mut app = application();
    app.controller(Calc::default(), ControllerOptions::new(["/c"]))
        .unwrap()
        .path_variable("id", "double", |_c: Arc<Calc>, _raw: String, _name: String| async move {
            Err::<Value, _>(HttpError::bad_request("id must be a number"))
        })
        .method("show", MethodOptions::get("/:id"), |c, _args| {
            c.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Reply::resolved(json!({})))
        });
    let server = app.build().await.unwrap();
    let calc = server.components().resolve::<Calc>().unwrap();
    let (status, body) = call(server.router(), get("/v1/c/abc")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "id must be a number");
    assert_eq!(calc.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn arguments_follow_index_not_registration_order() {
    let (status, body) = call(calc_router().await, get("/v1/c/ordered/list?a=A&b=B&c=C")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!(["A", "B", "C"]));
}

#[tokio::test]
async fn deferred_success_and_rejection() {
    let (status, body) = call(calc_router().await, get("/v1/c/find/one?q=known")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["messageCode"], 0);
    assert_eq!(body["name"], "known");
    assert_eq!(body["message"]["title"], "Found");

    // Rejection without a status uses the controller's error code.
    let (status, body) = call(calc_router().await, get("/v1/c/find/one?q=other")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "messageCode": 404, "message": "missing" }));
}

#[tokio::test]
async fn body_and_header_bindings() {
    let req = Request::builder()
        .method("POST")
        .uri("/v1/c/transfer")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::USER_AGENT, "tests/1.0")
        .body(Body::from(r#"{"amount":50}"#))
        .unwrap();
    let (status, body) = call(calc_router().await, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "amount": 50, "currency": "", "agent": "tests/1.0" }));

    let bad = Request::builder()
        .method("POST")
        .uri("/v1/c/transfer")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"amount":"lots"}"#))
        .unwrap();
    let (status, _) = call(calc_router().await, bad).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn immediate_values_and_any_method() {
    let (status, body) = call(calc_router().await, get("/v1/c/text/plain")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "pong");

    let req = Request::builder().method("DELETE").uri("/v1/c/echo/any").body(Body::empty()).unwrap();
    let (status, body) = call(calc_router().await, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "method": "DELETE", "path": "/v1/c/echo/any" }));
}

#[tokio::test]
async fn handler_errors_bypass_the_error_code() {
    let (status, body) = call(calc_router().await, get("/v1/c/boom/now")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "handler exploded");
}

#[tokio::test]
async fn unknown_routes_are_404() {
    let (status, _) = call(calc_router().await, get("/v1/nowhere")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[derive(Default)]
struct Files;

impl Component for Files {
    fn name() -> &'static str {
        "Files"
    }
}

#[tokio::test]
async fn file_and_download_replies() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("statement.txt");
    std::fs::write(&path, "statement body").unwrap();

    let mut app = application();
    let file_path = path.clone();
    app.controller(Files, ControllerOptions::new(["/files"]))
        .unwrap()
        .method("statement", MethodOptions::get("/statement").file(), move |_f, _args| {
            let p = file_path.clone();
            Ok(Reply::deferred(async move { Ok::<_, HttpError>(p) }))
        })
        .method("export", MethodOptions::get("/export").download(), |_f, _args| {
            Ok(Reply::deferred(async { Ok::<_, HttpError>(b"a,b\n1,2\n".to_vec()) }))
        })
        .method("broken", MethodOptions::get("/broken").download(), |_f, _args| {
            Ok(Reply::rejected(HttpError::msg("export failed")))
        });
    let router = app.build().await.unwrap().router();

    let res = router.clone().oneshot(get("/v1/files/statement")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"statement body");

    let res = router.clone().oneshot(get("/v1/files/export")).await.unwrap();
    assert_eq!(res.headers()[header::CONTENT_TYPE], "application/octet-stream");
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"a,b\n1,2\n");

    // Controller default error code (422) applies to file/download rejections.
    let (status, body) = call(router, get("/v1/files/broken")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["message"], "export failed");
}

#[derive(Default)]
struct Tagged;

impl Component for Tagged {
    fn name() -> &'static str {
        "Tagged"
    }
}

async fn tag(req: axum::extract::Request, next: axum::middleware::Next) -> Response {
    let mut res = next.run(req).await;
    res.headers_mut().insert("x-method-layer", "yes".parse().unwrap());
    res
}

async fn trail(req: axum::extract::Request, next: axum::middleware::Next) -> Response {
    let mut res = next.run(req).await;
    res.headers_mut().insert("x-controller-layer", "yes".parse().unwrap());
    res
}

#[tokio::test]
async fn method_and_controller_middleware() {
    let mut app = application();
    app.controller(Tagged, ControllerOptions::new(["/", "/alias"]).middleware(Middleware::from_fn(trail)))
        .unwrap()
        .method("a", MethodOptions::get("/a").middleware(Middleware::from_fn(tag)), |_t, _args| {
            Ok(Reply::immediate(json!("a")))
        })
        .method("b", MethodOptions::get("/b"), |_t, _args| Ok(Reply::immediate(json!("b"))));
    let router = app.build().await.unwrap().router();

    let res = router.clone().oneshot(get("/v1/a")).await.unwrap();
    assert_eq!(res.headers()["x-method-layer"], "yes");
    assert_eq!(res.headers()["x-controller-layer"], "yes");

    let res = router.clone().oneshot(get("/v1/alias/b")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().get("x-method-layer").is_none());
    assert_eq!(res.headers()["x-controller-layer"], "yes");
}

#[tokio::test]
async fn common_routes_sit_outside_the_prefix() {
    let router = calc_router().await;
    let (status, body) = call(router.clone(), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = call(router, get("/ready")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["database"], "ok");
}

#[derive(Default)]
struct Ledger;

impl Component for Ledger {
    fn name() -> &'static str {
        "Ledger"
    }
}

#[derive(Default, Serialize, Deserialize)]
struct SignIn {
    username: String,
    password: String,
    remember: String,
}

async fn ledger_router() -> Router {
    let mut app = application();
    app.controller(Ledger, ControllerOptions::new(["/ledger"]))
        .unwrap()
        .path_variable("account", "scaleAccount", |_l: Arc<Ledger>, raw: String, _name: String| async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let n: i64 = raw.parse().map_err(|_| HttpError::bad_request("account must be a number"))?;
            Ok::<_, HttpError>(json!(n * 10))
        })
        .path_variable("entry", "nextEntry", |_l: Arc<Ledger>, raw: String, _name: String| async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let n: i64 = raw.parse().map_err(|_| HttpError::bad_request("entry must be a number"))?;
            Ok::<_, HttpError>(json!(n + 1))
        })
        .method("entry", MethodOptions::get("/:account/:entry"), |_l, args| {
            Ok(Reply::immediate(json!({ "account": args.value(0), "entry": args.value(1) })))
        })
        .param("entry", ParameterBinding::path_variable(1, "entry"))
        .param("entry", ParameterBinding::path_variable(0, "account"))
        .method("locked", MethodOptions::get("/locked/now"), |_l, _args| {
            Ok(Reply::rejected(
                failure(2, Message::new("Account", "Account is locked")).with_status(StatusCode::NOT_FOUND),
            ))
        })
        .method("sign_in", MethodOptions::post("/sign-in"), |_l, args| {
            let form: SignIn = args.get(0)?;
            Ok(Reply::resolved(json!({ "username": form.username, "remember": form.remember })))
        })
        .param("sign_in", ParameterBinding::body::<SignIn>(0));
    app.build().await.unwrap().router()
}

#[tokio::test]
async fn path_variables_are_transformed_concurrently() {
    let started = Instant::now();
    let (status, body) = call(ledger_router().await, get("/v1/ledger/4/7")).await;
    let elapsed = started.elapsed();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "account": 40, "entry": 8 }));
    assert!(elapsed < Duration::from_millis(390), "transforms ran in sequence: {:?}", elapsed);
}

#[tokio::test]
async fn business_rejection_keeps_code_and_status() {
    let (status, body) = call(ledger_router().await, get("/v1/ledger/locked/now")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(
        body,
        json!({ "messageCode": 2, "message": { "title": "Account", "message": "Account is locked" } })
    );
}

#[tokio::test]
async fn form_bodies_bind_like_json() {
    let req = Request::builder()
        .method("POST")
        .uri("/v1/ledger/sign-in")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("username=demo&password=demo"))
        .unwrap();
    let (status, body) = call(ledger_router().await, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "username": "demo", "remember": "" }));
}
