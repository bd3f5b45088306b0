use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use imagefeed_core::api::ReqwestTransport;
use imagefeed_core::auth::{authorization_url, code_from_redirect, FileCredentialStore};
use imagefeed_core::config::ApiConfig;
use imagefeed_core::feed::Photo;
use imagefeed_core::profile::Profile;
use imagefeed_core::AppServices;
use serde_json::json;
use tokio::task;
use tracing_subscriber::EnvFilter;

const DEFAULT_PROFILE: &str = "default";
const LOG_ENV: &str = "IMAGEFEED_LOG";

#[derive(Parser, Debug)]
#[command(author, version, about = "Unsplash photo feed from the terminal")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Authentication related commands
    #[command(subcommand)]
    Auth(AuthCommand),
    /// List photos from the feed
    Feed(FeedArgs),
    /// Like or unlike a photo on the first feed page
    Like(LikeArgs),
    /// Show the signed-in user
    Me(MeArgs),
}

#[derive(Subcommand, Debug)]
enum AuthCommand {
    /// Print the authorization URL
    Url,
    /// Exchange an authorization code for an access token
    Login(LoginArgs),
    /// Forget the stored access token
    Logout(ProfileArgs),
}

#[derive(Args, Debug)]
struct ProfileArgs {
    /// Profile name for stored credentials
    #[arg(long, default_value = DEFAULT_PROFILE)]
    profile: String,
}

#[derive(Args, Debug)]
struct LoginArgs {
    /// Authorization code or the full redirect URL; prompted for when absent
    #[arg(long)]
    code: Option<String>,
    /// Print the authorization URL instead of opening a browser
    #[arg(long = "no-browser")]
    no_browser: bool,
    #[command(flatten)]
    profile: ProfileArgs,
}

#[derive(Args, Debug)]
struct FeedArgs {
    /// Number of pages to load
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..=50))]
    pages: u32,
    /// Output raw JSON
    #[arg(long)]
    json: bool,
    #[command(flatten)]
    profile: ProfileArgs,
}

#[derive(Args, Debug)]
struct LikeArgs {
    /// Photo id
    id: String,
    /// Remove the like instead of adding it
    #[arg(long)]
    unlike: bool,
    #[command(flatten)]
    profile: ProfileArgs,
}

#[derive(Args, Debug)]
struct MeArgs {
    /// Output raw JSON
    #[arg(long)]
    json: bool,
    #[command(flatten)]
    profile: ProfileArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Auth(cmd) => match cmd {
            AuthCommand::Url => auth_url()?,
            AuthCommand::Login(args) => auth_login(args).await?,
            AuthCommand::Logout(args) => auth_logout(args)?,
        },
        Commands::Feed(args) => feed(args).await?,
        Commands::Like(args) => like(args).await?,
        Commands::Me(args) => me(args).await?,
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config() -> Result<ApiConfig> {
    let config = ApiConfig::from_env().context("invalid IMAGEFEED_* configuration")?;
    if config.client_id.is_empty() {
        bail!("IMAGEFEED_ACCESS_KEY is not set");
    }
    Ok(config)
}

fn build_services(profile: &str) -> Result<AppServices> {
    let config = load_config()?;
    let store = FileCredentialStore::with_default_locator(profile)
        .context("unable to initialise credential store")?;
    let transport = ReqwestTransport::new().context("failed to build HTTP client")?;
    Ok(AppServices::new(Arc::new(transport), Arc::new(store), config))
}

fn signed_in_services(profile: &str) -> Result<AppServices> {
    let services = build_services(profile)?;
    if !services
        .is_signed_in()
        .context("failed to read stored credentials")?
    {
        bail!(
            "no credentials stored for profile '{}'; run `imagefeed auth login`",
            profile
        );
    }
    Ok(services)
}

fn auth_url() -> Result<()> {
    let config = load_config()?;
    println!("{}", authorization_url(&config));
    Ok(())
}

async fn auth_login(args: LoginArgs) -> Result<()> {
    let services = build_services(&args.profile.profile)?;

    let input = match args.code {
        Some(code) => code,
        None => {
            let url = authorization_url(services.config());
            println!("\nAuthorize the application by visiting:\n  {}\n", url);
            if !args.no_browser {
                if let Err(err) = open::that(url.as_str()) {
                    eprintln!("Failed to launch browser ({err}); open the URL manually.");
                }
            }
            prompt_for_code().await?
        }
    };

    let code = code_from_redirect(&input, services.config())?;
    services
        .exchange()
        .exchange(&code)
        .await
        .context("token exchange failed")?;
    println!(
        "Login succeeded. Credentials stored for profile '{}'.",
        args.profile.profile
    );

    match services.profile().fetch_profile().await {
        Ok(profile) => println!("Logged in as {}", profile.login_name),
        Err(err) => eprintln!("Login succeeded but profile request failed: {err}"),
    }
    Ok(())
}

fn auth_logout(args: ProfileArgs) -> Result<()> {
    let services = build_services(&args.profile)?;
    services
        .logout()
        .context("failed to remove stored credentials")?;
    println!("Deleted credentials for profile '{}'.", args.profile);
    Ok(())
}

async fn prompt_for_code() -> Result<String> {
    task::spawn_blocking(|| -> Result<String> {
        use std::io::{self, Write};
        print!("Paste the authorization code or redirect URL: ");
        io::stdout().flush()?;
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        Ok(input.trim().to_owned())
    })
    .await
    .context("prompt task failed")?
}

async fn load_pages(services: &AppServices, pages: u32) -> Result<()> {
    let feed = services.feed();
    for _ in 0..pages {
        let fetch = feed
            .fetch_next_page()
            .ok_or_else(|| anyhow!("no access token available; run `imagefeed auth login`"))?;
        let page = fetch.page();
        let added = fetch
            .finished()
            .await
            .with_context(|| format!("failed to load page {page}"))?;
        if added == 0 {
            break;
        }
    }
    Ok(())
}

async fn feed(args: FeedArgs) -> Result<()> {
    let services = signed_in_services(&args.profile.profile)?;
    load_pages(&services, args.pages).await?;

    let photos = services.feed().photos();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&photos)?);
    } else {
        render_photos(&photos);
    }
    Ok(())
}

async fn like(args: LikeArgs) -> Result<()> {
    let services = signed_in_services(&args.profile.profile)?;
    load_pages(&services, 1).await?;

    let feed = services.feed();
    if !feed.photos().iter().any(|photo| photo.id == args.id) {
        eprintln!(
            "Photo {} is not on the first feed page; sending the request anyway.",
            args.id
        );
    }
    feed.change_like(&args.id, !args.unlike)
        .await
        .context("like request failed")?;

    match feed.photos().into_iter().find(|photo| photo.id == args.id) {
        Some(photo) => println!(
            "{} is now {}",
            photo.id,
            if photo.is_liked { "liked" } else { "not liked" }
        ),
        None => println!("{} {}", if args.unlike { "Unliked" } else { "Liked" }, args.id),
    }
    Ok(())
}

async fn me(args: MeArgs) -> Result<()> {
    let services = signed_in_services(&args.profile.profile)?;
    let profile = services
        .profile()
        .fetch_profile()
        .await
        .context("profile request failed")?;
    let avatar = match services.avatar().fetch_avatar_url(&profile.username).await {
        Ok(url) => Some(url),
        Err(err) => {
            tracing::warn!(error = %err, "profile image lookup failed");
            None
        }
    };

    if args.json {
        let value = json!({ "profile": profile, "avatar_url": avatar });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        render_profile(&profile, avatar.as_deref());
    }
    Ok(())
}

fn render_photos(photos: &[Photo]) {
    if photos.is_empty() {
        println!("No photos.");
        return;
    }
    for (index, photo) in photos.iter().enumerate() {
        let liked = if photo.is_liked { "♥" } else { " " };
        let created = photo
            .created_at
            .map(|at| at.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "{:>3} {} {:<12} {:>5}x{:<5} {}  {}",
            index + 1,
            liked,
            photo.id,
            photo.size.width,
            photo.size.height,
            created,
            photo.description.as_deref().unwrap_or("")
        );
    }
}

fn render_profile(profile: &Profile, avatar: Option<&str>) {
    println!("Login  : {}", profile.login_name);
    if !profile.name.is_empty() {
        println!("Name   : {}", profile.name);
    }
    if let Some(bio) = &profile.bio {
        println!("Bio    : {}", bio);
    }
    if let Some(url) = avatar {
        println!("Avatar : {}", url);
    }
}
