//! Demo components: categories, login, profile and a nightly report job.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use switchboard_sdk::{
    failure, success, Application, BoxError, Component, ConfigError, ControllerOptions, CronField, CronSyntax,
    HttpError, Inject, JwtVerifier, Message, MethodOptions, ParamKind, ParameterBinding, Reply, Repository, RequestMethod,
    TaskOptions,
};

const SEED_CATEGORIES: &[(&str, &str)] = &[
    ("Food", "Restaurants and groceries"),
    ("Travel", "Tickets, hotels and fuel"),
    ("Bills", "Utilities and subscriptions"),
];

#[derive(Default)]
pub struct CategoryController {
    categories: Inject<dyn Repository>,
}

#[async_trait]
impl Component for CategoryController {
    fn name() -> &'static str {
        "CategoryController"
    }

    async fn on_init(&self) -> Result<(), BoxError> {
        let repo = self.categories.get()?;
        if repo.count().await? > 0 {
            return Ok(());
        }
        for (name, description) in SEED_CATEGORIES {
            repo.save(json!({ "name": name, "description": description })).await?;
        }
        tracing::info!(count = SEED_CATEGORIES.len(), "seeded categories");
        Ok(())
    }
}

impl CategoryController {
    fn index(self: Arc<Self>) -> Reply {
        Reply::deferred(async move {
            let rows = self.categories.get()?.find(&[]).await?;
            success(Message::new("Categories", "Query completed"), json!({ "list": rows }))
        })
    }

    fn show(self: Arc<Self>, id: Value) -> Reply {
        Reply::deferred(async move {
            match self.categories.get()?.find_one(&id).await? {
                Some(row) => success(Message::new("Category", "Query completed"), row),
                None => Err(HttpError::msg("category not found").with_status(StatusCode::NOT_FOUND)),
            }
        })
    }
}

#[derive(Default, Deserialize, Serialize)]
pub struct LoginRequest {
    username: String,
    password: String,
}

pub struct LoginController {
    users: Inject<dyn Repository>,
    jwt: JwtVerifier,
}

#[async_trait]
impl Component for LoginController {
    fn name() -> &'static str {
        "LoginController"
    }

    async fn on_init(&self) -> Result<(), BoxError> {
        let repo = self.users.get()?;
        if repo.count().await? == 0 {
            repo.save(json!({ "username": "demo", "password": "demo", "fail_login": 0 })).await?;
        }
        Ok(())
    }
}

impl LoginController {
    /// Demo credentials are stored in plain text.
    fn login(self: Arc<Self>, form: LoginRequest) -> Reply {
        Reply::deferred(async move {
            let denied = || failure(3, Message::new("Login failed", "Invalid username or password."));
            if form.username.is_empty() || form.password.is_empty() {
                return Err(failure(2, Message::new("Login failed", "Credentials were not sent.")));
            }
            let users = self.users.get()?;
            let Some(mut user) = users
                .find_one_by(&[("username".to_string(), Value::from(form.username.clone()))])
                .await?
            else {
                return Err(denied());
            };
            if user["fail_login"].as_i64().unwrap_or(0) >= 3 {
                return Err(failure(4, Message::new("Login failed", "Too many failed attempts.")));
            }
            if user["password"] != form.password.as_str() {
                user["fail_login"] = Value::from(user["fail_login"].as_i64().unwrap_or(0) + 1);
                users.save(user).await?;
                return Err(denied());
            }
            let token = self
                .jwt
                .issue(json!({ "id": user["id"], "username": user["username"] }))
                .map_err(|e| HttpError::internal(e.to_string()))?;
            user["fail_login"] = Value::from(0);
            users.save(user).await?;
            success(Message::new("Login", "Signed in"), json!({ "token": token }))
        })
    }
}

#[derive(Default)]
pub struct ProfileController;

impl Component for ProfileController {
    fn name() -> &'static str {
        "ProfileController"
    }
}

#[derive(Default)]
pub struct ReportJob {
    categories: Inject<dyn Repository>,
}

impl Component for ReportJob {
    fn name() -> &'static str {
        "ReportJob"
    }
}

impl ReportJob {
    fn run(self: Arc<Self>) -> Reply {
        Reply::deferred(async move {
            let total = self.categories.get()?.count().await?;
            Ok::<_, HttpError>(json!({ "categories": total }))
        })
    }
}

pub fn register(app: &mut Application) -> Result<(), ConfigError> {
    app.controller(CategoryController::default(), ControllerOptions::new(["/category"]))?
        .inject_repository("categories", "Category", |c: &CategoryController| &c.categories)
        .method("index", MethodOptions::get("/"), |c, _args| Ok(c.index()))
        .method("show", MethodOptions::get("/:id"), |c, args| Ok(c.show(args.value(0).clone())))
        .param("show", ParameterBinding::path_variable(0, "id"))
        .path_variable("id", "parseId", |_c: Arc<CategoryController>, raw: String, name: String| async move {
            raw.parse::<i64>()
                .map(Value::from)
                .map_err(|_| HttpError::bad_request(format!("{} must be numeric", name)))
        });

    let jwt = app.jwt();
    app.controller(
        LoginController {
            users: Inject::new(),
            jwt,
        },
        ControllerOptions::new(["/login"]).method(RequestMethod::Post),
    )?
    .inject_repository("users", "User", |c: &LoginController| &c.users)
    .method("login", MethodOptions::default(), |c, args| Ok(c.login(args.get(0)?)))
    .param("login", ParameterBinding::body::<LoginRequest>(0));

    app.controller(ProfileController, ControllerOptions::new(["/profile"]).authenticated())?
        .method("me", MethodOptions::get("/me"), |_c, args| {
            Ok(Reply::resolved(json!({ "messageCode": 0, "user": args.value(0) })))
        })
        .param("me", ParameterBinding::at(0, ParamKind::HttpResponse, ["res", "locals", "jwtPayload"]));

    app.component(ReportJob::default())?;
    app.scope::<ReportJob>()
        .inject_repository("categories", "Category", |j: &ReportJob| &j.categories)
        .task(
            "run",
            CronSyntax {
                minute: CronField::Value(0),
                hour: CronField::Value(3),
                ..Default::default()
            },
            TaskOptions::default().timezone("-03:00"),
            |job| job.run(),
        )?;
    Ok(())
}
