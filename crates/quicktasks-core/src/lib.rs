pub mod cli;
pub mod commands;
pub mod config;
pub mod datastore;
pub mod engine;
pub mod filter;
pub mod identity;
pub mod migration;
pub mod mode;
pub mod preferences;
pub mod render;
pub mod session;
pub mod store;
pub mod task;

use std::ffi::OsString;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

use crate::commands::App;
use crate::config::Config;
use crate::identity::{
  IdentityProvider,
  LocalIdentity
};
use crate::render::Renderer;
use crate::store::{
  DocumentStore,
  KeyValueStore,
  LocalListStore,
  RemoteStores
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args);
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting quicktasks CLI"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.rc_file.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let store =
    datastore::DataStore::open(
      &data_dir
    )
    .with_context(|| {
      format!(
        "failed to open datastore at \
         {}",
        data_dir.display()
      )
    })?;

  let renderer = Renderer::new(&cfg)?;
  let inv = cli::Invocation::parse(
    &cfg, cli.rest
  )?;

  let runtime =
    tokio::runtime::Builder::new_current_thread()
      .enable_all()
      .build()
      .context(
        "failed to start async runtime"
      )?;

  runtime.block_on(async move {
    let mut app = open_app(
      store.key_value(),
      store.documents(),
      &cfg,
      renderer
    )
    .await?;

    let result =
      commands::dispatch(&mut app, inv)
        .await;

    if app.engine.is_saving() {
      app.renderer.print_saving()?;
    }
    app.engine.settle().await;

    info!("done");
    result
  })
}

/// Builds the state one command runs against and replays the remembered
/// session into it. Must be awaited inside a tokio runtime.
#[tracing::instrument(skip_all)]
pub async fn open_app(
  kv: Arc<dyn KeyValueStore>,
  docs: Arc<dyn DocumentStore>,
  cfg: &Config,
  mut renderer: Renderer
) -> anyhow::Result<App> {
  let preferences =
    preferences::Preferences::load(
      kv.clone()
    );
  renderer.set_theme(
    preferences
      .theme()
      .resolved(
        render::system_prefers_dark()
      )
  );

  let engine = engine::Engine::new(
    Arc::new(LocalListStore::new(
      kv.clone()
    )),
    Arc::new(RemoteStores::new(docs)),
    cfg.engine_settings()
  );
  let session =
    session::Session::load(&kv);

  let mut app = App {
    engine,
    preferences,
    session,
    kv,
    renderer
  };

  restore_session(&mut app).await?;
  Ok(app)
}

/// Replays the remembered guest choice and sign-in into a fresh engine.
#[tracing::instrument(skip_all)]
async fn restore_session(
  app: &mut App
) -> anyhow::Result<()> {
  if app.session.guest {
    app.engine.continue_as_guest().await;
  }

  let owner = app
    .session
    .owner_id
    .clone()
    .unwrap_or_default();
  let identity =
    LocalIdentity::new(owner);
  identity.resolve(
    app.session.identity_state()
  );
  app
    .engine
    .sync_identity(
      &identity.current_state()
    )
    .await;

  if let Some(report) =
    app.engine.last_migration()
  {
    app
      .renderer
      .print_migration(report)?;
    if report.is_complete() {
      app.session.guest = false;
      app.session.save(&app.kv)?;
    }
  }

  debug!(mode = ?app.engine.mode(), "session restored");
  commands::restore_active_list(app)
    .await;
  Ok(())
}
