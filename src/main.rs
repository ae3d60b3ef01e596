mod args;
mod auth;
mod backend;
mod recipesync;
mod saved;
mod session;
mod time;
mod user;

use std::str::FromStr;
use std::sync::Arc;

use clap::Parser;
use cookie::{Cookie, SameSite};
use log::error;
use serde::Serialize;
use warp::http::{self, header::SET_COOKIE};
use warp::{Filter, Rejection, Reply};

use crate::args::Args;
use crate::auth::SessionId;
use crate::backend::Backend;
use crate::recipesync::{Error, RecipeSync, SignIn, SignUp, SignedIn};
use crate::saved::SavedList;
use crate::user::Role;

const SESSION_COOKIE: &str = "sessionid";

#[tokio::main]
async fn main() {
    pretty_env_logger::init();

    let args = Args::parse();
    let addr = match args.addr() {
        Ok(addr) => addr,
        Err(e) => {
            error!("couldn't parse address: {e}");
            std::process::exit(2);
        }
    };
    let secure = args.secure();

    let backend = Backend::new(args.data_dir()).await;
    let sync = Arc::new(RecipeSync::new(backend));

    let signin = warp::path!("api" / "1" / "signin")
        .and(warp::post())
        .and(with_sync(&sync))
        .and(warp::body::json())
        .and_then(move |sync, body| handle_signin(sync, body, secure));

    let signup = warp::path!("api" / "1" / "signup")
        .and(warp::post())
        .and(with_sync(&sync))
        .and(warp::body::json())
        .and_then(|sync, body| handle_signup(sync, Role::User, body));

    let admin_signup = warp::path!("api" / "1" / "adminsignup")
        .and(warp::post())
        .and(with_sync(&sync))
        .and(warp::body::json())
        .and_then(|sync, body| handle_signup(sync, Role::Admin, body));

    let signout = warp::path!("api" / "1" / "signout")
        .and(warp::post())
        .and(with_sync(&sync))
        .and(warp::cookie::optional::<String>(SESSION_COOKIE))
        .and_then(handle_signout);

    let session = warp::path!("api" / "1" / "session")
        .and(warp::get())
        .and(with_sync(&sync))
        .and(warp::cookie::optional::<String>(SESSION_COOKIE))
        .and_then(handle_session);

    let get_saved = warp::path!("api" / "1" / "saved" / String)
        .and(warp::get())
        .and(with_sync(&sync))
        .and_then(handle_get_saved);

    let put_saved = warp::path!("api" / "1" / "saved" / String)
        .and(warp::put())
        .and(with_sync(&sync))
        .and(warp::body::json())
        .and_then(handle_put_saved);

    let routes = signin
        .or(signup)
        .or(admin_signup)
        .or(signout)
        .or(session)
        .or(get_saved)
        .or(put_saved)
        .recover(recover)
        .with(warp::log("recipesync"));

    warp::serve(routes).run(addr).await;
}

fn with_sync(
    sync: &Arc<RecipeSync>,
) -> impl Filter<Extract = (Arc<RecipeSync>,), Error = std::convert::Infallible> + Clone {
    let sync = Arc::clone(sync);
    warp::any().map(move || Arc::clone(&sync))
}

async fn handle_signin(
    sync: Arc<RecipeSync>,
    body: SignIn,
    secure: bool,
) -> Result<impl Reply, Rejection> {
    let (session_id, session) = sync
        .sign_in(&body.username, &body.password)
        .await
        .map_err(warp::reject::custom)?;

    let reply = warp::reply::json(&SignedIn {
        username: session.username,
        is_admin: session.is_admin,
        saved: session.saved,
    });

    let cookie = session_cookie(&session_id, secure);
    Ok(warp::reply::with_header(
        reply,
        SET_COOKIE,
        cookie.to_string(),
    ))
}

async fn handle_signup(
    sync: Arc<RecipeSync>,
    role: Role,
    body: SignUp,
) -> Result<impl Reply, Rejection> {
    sync.sign_up(role, &body)
        .await
        .map_err(warp::reject::custom)?;

    Ok(warp::reply())
}

async fn handle_signout(
    sync: Arc<RecipeSync>,
    session_cookie: Option<String>,
) -> Result<impl Reply, Rejection> {
    let session_id = session_cookie
        .as_deref()
        .and_then(|s| SessionId::from_str(s).ok());

    sync.sign_out(session_id);

    let mut removal = Cookie::new(SESSION_COOKIE, "");
    removal.set_path("/");
    removal.make_removal();

    Ok(warp::reply::with_header(
        warp::reply(),
        SET_COOKIE,
        removal.to_string(),
    ))
}

/// The rendering layer asks here whether the caller is signed in and
/// whether to show admin-only UI.
async fn handle_session(
    sync: Arc<RecipeSync>,
    session_cookie: Option<String>,
) -> Result<impl Reply, Rejection> {
    session_cookie
        .as_deref()
        .and_then(|s| SessionId::from_str(s).ok())
        .and_then(|id| sync.session(&id))
        .map(|session| warp::reply::json(&session))
        .ok_or_else(|| warp::reject::custom(Error::InvalidCredentials))
}

async fn handle_get_saved(
    username: String,
    sync: Arc<RecipeSync>,
) -> Result<impl Reply, Rejection> {
    let saved = sync
        .saved_items(&username)
        .await
        .map_err(warp::reject::custom)?;

    Ok(warp::reply::json(&saved))
}

async fn handle_put_saved(
    username: String,
    sync: Arc<RecipeSync>,
    items: SavedList,
) -> Result<impl Reply, Rejection> {
    sync.save_items(&username, items)
        .await
        .map_err(warp::reject::custom)?;

    Ok(warp::reply())
}

fn session_cookie(session_id: &SessionId, secure: bool) -> Cookie<'static> {
    let mut cookie = Cookie::new(SESSION_COOKIE, session_id.to_string());
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Strict);
    cookie.set_secure(secure);
    cookie
}

#[derive(Serialize)]
struct ErrorReply {
    error: &'static str,
}

async fn recover(rejection: Rejection) -> Result<impl Reply, Rejection> {
    match rejection.find::<Error>() {
        Some(&e) => {
            let status: http::StatusCode = e.into();
            let body = warp::reply::json(&ErrorReply { error: e.message() });

            Ok(warp::reply::with_status(body, status))
        }
        None => Err(rejection),
    }
}
