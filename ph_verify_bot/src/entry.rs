use std::{fs, sync::Arc};
use teloxide::{
    dptree::deps,
    payloads::SetMyCommandsSetters,
    prelude::*,
    types::{BotCommandScope, Recipient},
};

use crate::{
    config::Config,
    context::AppContext,
    database::Database,
    handlers::{generate_bot_commands, handle_chat_member, handle_join_request, handle_message},
    reminders::sweep_spinloop,
};

/// # Panics
///
/// Panics if there's no key file, or if the database can't be opened.
pub async fn entry() {
    log::info!("ASYNC WOOOO");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Bad configuration: {e}");
            return;
        }
    };

    let key = fs::read_to_string(match cfg!(debug_assertions) {
        true => "key_debug",
        false => "key",
    })
    .expect("Could not load bot key file!");

    let bot = Bot::new(key.trim());

    bot.set_my_commands(generate_bot_commands(false))
        .await
        .expect("Failed to set bot commands!");

    // The admin sees their own commands too. This fails if they never talked to the bot.
    if let Err(e) = bot
        .set_my_commands(generate_bot_commands(true))
        .scope(BotCommandScope::Chat {
            chat_id: Recipient::Id(ChatId::from(config.admin_id)),
        })
        .await
    {
        log::warn!("Failed to set admin commands: {e}");
    }

    let database: Arc<Database> = Database::new(&config.database_url)
        .await
        .expect("Failed to create database!");

    tokio::spawn(sweep_spinloop(
        bot.clone(),
        Arc::downgrade(&database),
        config.sweep,
        config.admin_id,
    ));

    let ctx = AppContext::new(config, database);

    log::info!("Creating the handler...");

    let handler = dptree::entry()
        .branch(Update::filter_chat_join_request().endpoint(handle_join_request))
        .branch(Update::filter_chat_member().endpoint(handle_chat_member))
        .branch(Update::filter_message().endpoint(handle_message));

    log::info!("Dispatching the dispatcher!");

    Dispatcher::builder(bot, handler)
        .default_handler(|_| async {})
        .dependencies(deps![ctx])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    log::info!("it appears we have been bonked.");
}
