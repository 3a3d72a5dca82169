use std::{fs, sync::Arc};

use teloxide::{dptree::deps, prelude::*, RequestError};

use crate::{
    config::{Config, MissingIndexPolicy},
    handlers,
    handlers::commands::Command,
    pipeline::Context,
};

/// # Panics
/// Panics if the bot fails to start: no config, no key, or backends that can't be built.
pub async fn entry() {
    magick_rust::magick_wand_genesis();

    let config_path = Config::default_path();
    log::info!("Loading config from {}", config_path.display());
    let config = Config::load(&config_path).expect("Could not load the config!");

    let key = fs::read_to_string(match cfg!(debug_assertions) {
        true => "key_debug",
        false => "key",
    })
    .expect("Could not load bot key file!");

    let mut bot = Bot::new(key.trim());
    if let Some(api_url) = &config.bot.api_url {
        let api_url = url::Url::parse(api_url).expect("Bot API URL in the config is invalid!");
        bot = bot.set_api_url(api_url);
    }

    if config.bot.admins.is_empty() {
        log::warn!("No admins are configured, nobody will be able to use the bot.");
    }

    let context = Context::from_config(config).expect("Could not set up storage and publishing!");

    match context.config.storage.missing_index {
        MissingIndexPolicy::Lenient => match context.index.ensure().await {
            Ok(true) => log::info!("Started a fresh empty index."),
            Ok(false) => (),
            Err(e) => log::error!("Could not check the index, will retry on first use: {e}"),
        },
        MissingIndexPolicy::Strict => {
            if let Err(e) = context.index.snapshot().await {
                log::error!("Index is not usable, uploads will fail until it is: {e}");
            }
        }
    }

    let context = Arc::new(context);

    let commands = Command::generate_bot_commands();
    bot.set_my_commands(commands)
        .await
        .expect("Failed to set bot commands!");

    log::info!("Creating the handler...");

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handlers::handle_message))
        .endpoint(|| async { Ok::<(), RequestError>(()) });

    log::info!("Dispatching the dispatcher!");

    Dispatcher::builder(bot, handler)
        .default_handler(|_| async {})
        .dependencies(deps![context.clone()])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    log::info!("it appears we have been bonked.");

    // Stop waiting on video hosts, whatever's still running.
    context.cancel.cancel();

    magick_rust::magick_wand_terminus();
}
