use std::{sync::Arc, time::Duration};

use teloxide::{dispatching::Dispatcher, dptree, prelude::*, types::Message as TgMessage};

use tokio_util::sync::CancellationToken;

use amr_core::{
    config::Config,
    dispatch::{event::InboundEvent, rules::default_rules, Dispatcher as CoreDispatcher, DispatcherBuilder},
    domain::{ChatId, UpdateId, UserId},
    janitor,
    messaging::{
        port::MessagingPort,
        throttled::{ThrottleConfig, ThrottledMessenger},
        types::ChatInfo,
    },
    ports::{PseudonymGenerator, Storage},
    services::{Collaborators, Core},
    storage::StorageSessionContext,
};

use crate::{chat_info, TelegramMessenger};

const JANITOR_EVERY: Duration = Duration::from_secs(60);

/// Build the core around a Telegram messenger and long-poll until Ctrl-C.
pub async fn run_polling(
    mut cfg: Config,
    storage: Arc<dyn Storage>,
    pseudonyms: Arc<dyn PseudonymGenerator>,
) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    match bot.get_me().await {
        Ok(me) => {
            tracing::info!(username = %me.username(), "bot started");
            if cfg.bot_username.is_none() {
                cfg.bot_username = Some(me.username().to_string());
            }
        }
        Err(e) => tracing::warn!(error = %e, "get_me failed; deep links fall back to /start"),
    }
    tracing::info!(
        admins = cfg.admin_ids.len(),
        ttls = cfg.allowed_ttls.len(),
        resilience = cfg.resilience_enabled,
        "configuration loaded"
    );

    // 429s are still retried once inside the adapter; the throttle keeps bursts
    // of relay traffic from hitting them in the first place.
    let raw_messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let messenger: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
        raw_messenger,
        ThrottleConfig::default(),
    ));

    let core = Core::new(
        Arc::new(cfg),
        Collaborators {
            messenger,
            session: Arc::new(StorageSessionContext::new(storage.clone())),
            storage,
            pseudonyms,
        },
    );

    let dispatcher = Arc::new(
        DispatcherBuilder::new(core.clone())
            .rules(default_rules())
            .build()?,
    );
    tracing::info!(rules = ?dispatcher.rule_names(), "dispatcher ready");

    let cancel = CancellationToken::new();
    let janitor = janitor::spawn(core, JANITOR_EVERY, cancel.clone());

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(on_callback))
        .branch(Update::filter_message().endpoint(on_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![dispatcher])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    cancel.cancel();
    if let Err(e) = janitor.await {
        tracing::warn!(error = %e, "janitor task ended abnormally");
    }
    tracing::info!("shutdown complete");
    Ok(())
}

async fn on_message(
    upd: Update,
    msg: TgMessage,
    dispatcher: Arc<CoreDispatcher>,
) -> ResponseResult<()> {
    let Some(from) = msg.from() else {
        // Channel posts and service messages have no sender.
        return Ok(());
    };
    let event = message_event(
        UpdateId(i64::from(upd.id)),
        UserId(from.id.0 as i64),
        ChatId(msg.chat.id.0),
        msg.text().or(msg.caption()).map(str::to_string),
        msg.forward_from_chat().map(chat_info),
    );
    let outcome = dispatcher.dispatch(event).await;
    tracing::debug!(?outcome, "message dispatched");
    Ok(())
}

async fn on_callback(
    upd: Update,
    q: CallbackQuery,
    dispatcher: Arc<CoreDispatcher>,
) -> ResponseResult<()> {
    let user_id = UserId(q.from.id.0 as i64);
    let chat_id = q
        .message
        .as_ref()
        .map(|m| ChatId(m.chat.id.0))
        .unwrap_or_else(|| user_id.into());
    let event = callback_event(UpdateId(i64::from(upd.id)), user_id, chat_id, q.id, q.data);
    let outcome = dispatcher.dispatch(event).await;
    tracing::debug!(?outcome, "callback dispatched");
    Ok(())
}

pub(crate) fn message_event(
    update_id: UpdateId,
    user_id: UserId,
    chat_id: ChatId,
    text: Option<String>,
    forwarded_from: Option<ChatInfo>,
) -> InboundEvent {
    InboundEvent {
        update_id,
        user_id,
        chat_id,
        text,
        callback_data: None,
        callback_id: None,
        forwarded_from,
    }
}

pub(crate) fn callback_event(
    update_id: UpdateId,
    user_id: UserId,
    chat_id: ChatId,
    callback_id: String,
    data: Option<String>,
) -> InboundEvent {
    InboundEvent {
        update_id,
        user_id,
        chat_id,
        text: None,
        // An empty payload still has to reach the dispatcher so the spinner
        // gets answered.
        callback_data: Some(data.unwrap_or_default()),
        callback_id: Some(callback_id),
        forwarded_from: None,
    }
}
