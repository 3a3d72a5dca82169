pub mod commands;

use std::sync::Arc;

use bot_commons::{is_operator, useful_methods::*};
use teloxide::{
    requests::Requester,
    sugar::request::RequestReplyExt,
    types::{ChatId, FileMeta, Me, Message, MessageId},
    Bot, RequestError,
};
use tokio::sync::watch;

use crate::{
    index::SourceKind,
    pipeline::{Context, Progress, UploadRequest},
};
use commands::{find_link, parse_request, Command, Request};

/// Work that takes a while, so it runs off the dispatcher with a status message.
#[derive(Debug)]
enum Job {
    Upload {
        file: FileMeta,
        title: Option<String>,
    },
    Link {
        url: String,
        title: Option<String>,
    },
    Thumb {
        photo: FileMeta,
        video_id: String,
    },
    Retitle {
        video_id: String,
        title: String,
    },
    SyncPages,
    Reindex,
    Gallery,
}

pub async fn handle_message(
    bot: Bot,
    me: Me,
    message: Message,
    context: Arc<Context>,
) -> Result<(), RequestError> {
    let sender_id = message.from.as_ref().map(|user| user.id);
    // Bot ignores messages made by itself.
    if sender_id == Some(me.id) {
        return Ok(());
    }

    if !is_operator(sender_id, &context.config.bot.admins) {
        log::debug!("Ignoring a message from {sender_id:?}, not an operator");
        if message.chat.is_private() {
            reply(&bot, &message, "Sorry, this bot is private.").await?;
        }
        return Ok(());
    }

    let text = message.text_full().unwrap_or_default();

    if let Some(video) = message.get_video_info() {
        // A caption is the title, unless it looks like a command.
        let title = Some(text.trim())
            .filter(|t| !t.is_empty() && !t.starts_with('/'))
            .map(str::to_string);
        log::info!(
            "Operator {sender_id:?} sent a video ({})",
            video.file_name.unwrap_or("no name")
        );
        let job = Job::Upload {
            file: video.file.clone(),
            title,
        };
        spawn_job(bot, &message, context, job);
        return Ok(());
    }

    if let Some(photo) = message.find_biggest_photo() {
        match parse_request(text, me.username()) {
            Some(Request::Thumb { video_id }) => {
                let job = Job::Thumb {
                    photo: photo.file.clone(),
                    video_id: video_id.to_string(),
                };
                spawn_job(bot, &message, context, job);
            }
            _ => {
                reply(
                    &bot,
                    &message,
                    "To use this photo as a thumbnail, send it with the caption /thumb <id>.",
                )
                .await?;
            }
        }
        return Ok(());
    }

    if let Some(request) = parse_request(text, me.username()) {
        return handle_request(bot, message.clone(), context, request).await;
    }

    if let Some((url, title)) = find_link(text) {
        log::info!("Operator {sender_id:?} sent a link: {url}");
        let job = Job::Link {
            url: url.to_string(),
            title,
        };
        spawn_job(bot, &message, context, job);
        return Ok(());
    }

    if message.chat.is_private() {
        reply(&bot, &message, "Send me a video or a link to one. See /help.").await?;
    }

    Ok(())
}

async fn handle_request(
    bot: Bot,
    message: Message,
    context: Arc<Context>,
    request: Request<'_>,
) -> Result<(), RequestError> {
    match request {
        Request::Start => {
            let mut response = String::from("Hi! Send me a video or a link to one. See /help.");
            match (context.settings.titles().await, context.settings.blur_sigma().await) {
                (Ok(titles), Ok(sigma)) => {
                    response += &format!(
                        "\n\n{} titles in the pool, safe thumbnails are blurred by {sigma}.",
                        titles.len()
                    );
                }
                (Err(e), _) | (_, Err(e)) => log::warn!("Could not read settings: {e}"),
            }
            reply(&bot, &message, &response).await?;
        }
        Request::Help => {
            reply(&bot, &message, &Command::generate_help()).await?;
        }
        Request::Stats => {
            let response = match context.stats().await {
                Ok(count) => format!("{count} videos are indexed."),
                Err(e) => {
                    log::error!("Failed to count videos: {e}");
                    format!("Failed: {e}")
                }
            };
            reply(&bot, &message, &response).await?;
        }
        Request::SyncPages => spawn_job(bot, &message, context, Job::SyncPages),
        Request::Reindex => spawn_job(bot, &message, context, Job::Reindex),
        Request::Retitle { video_id, title } => {
            let job = Job::Retitle {
                video_id: video_id.to_string(),
                title: title.to_string(),
            };
            spawn_job(bot, &message, context, job);
        }
        Request::Thumb { .. } => {
            reply(
                &bot,
                &message,
                "Send /thumb <id> as the caption of a photo, not on its own.",
            )
            .await?;
        }
        Request::Titles => {
            let response = match context.settings.titles().await {
                Ok(titles) => list_titles(&titles),
                Err(e) => {
                    log::error!("Failed to read the title pool: {e}");
                    format!("Failed: {e}")
                }
            };
            reply(&bot, &message, &response).await?;
        }
        Request::AddTitle { title } => {
            let response = match context.settings.add_title(title).await {
                Ok(titles) => format!("Added. {} titles in the pool now.", titles.len()),
                Err(e) => format!("Failed: {e}"),
            };
            reply(&bot, &message, &response).await?;
        }
        Request::RemoveTitle { position } => {
            let response = match context.settings.remove_title(position).await {
                Ok(removed) => format!("Removed \"{removed}\"."),
                Err(e) => format!("Failed: {e}"),
            };
            reply(&bot, &message, &response).await?;
        }
        Request::Blur { sigma: None } => {
            let response = match context.settings.blur_sigma().await {
                Ok(sigma) => format!("Safe thumbnails are blurred by {sigma}. /blur <strength> changes it."),
                Err(e) => format!("Failed: {e}"),
            };
            reply(&bot, &message, &response).await?;
        }
        Request::Blur { sigma: Some(sigma) } => {
            let response = match context.settings.set_blur_sigma(sigma).await {
                Ok(()) => format!("New thumbnails will be blurred by {sigma}."),
                Err(e) => format!("Failed: {e}"),
            };
            reply(&bot, &message, &response).await?;
        }
        Request::Gallery => spawn_job(bot, &message, context, Job::Gallery),
        Request::Usage(usage) => {
            reply(&bot, &message, &format!("Usage: {usage}")).await?;
        }
        Request::Unknown(callname) => {
            reply(&bot, &message, &format!("No idea what {callname} is. See /help.")).await?;
        }
    }

    Ok(())
}

/// Numbered, so the numbers work with /removetitle.
fn list_titles(titles: &[String]) -> String {
    if titles.is_empty() {
        return "The title pool is empty. Add one with /addtitle.".to_string();
    }
    let mut response = String::from("Titles:");
    for (number, title) in titles.iter().enumerate() {
        response += &format!("\n{}. {title}", number + 1);
    }
    response
}

async fn reply(bot: &Bot, message: &Message, text: &str) -> Result<(), RequestError> {
    bot.send_message(message.chat.id, truncate_for_telegram(text, MAX_MESSAGE_CHARS))
        .reply_to(message.id)
        .await?;
    Ok(())
}

fn spawn_job(bot: Bot, message: &Message, context: Arc<Context>, job: Job) {
    log::debug!("Spawning {job:?}");
    tokio::spawn(run_job(bot, message.chat.id, message.id, context, job));
}

/// Do the job, mirroring its progress into one status message that ends
/// up showing how it went.
async fn run_job(
    bot: Bot,
    chat_id: ChatId,
    reply_to: MessageId,
    context: Arc<Context>,
    job: Job,
) {
    let mut status = match StatusMessage::send(&bot, chat_id, reply_to, "Working on it...").await
    {
        Ok(status) => status,
        Err(e) => {
            // No way to report back, but the work can still get done.
            log::warn!("Could not send a status message: {e}");
            let (progress, _) = watch::channel(String::new());
            let result = perform(&bot, &context, job, &progress).await;
            log::info!("Job done without a status message: {result}");
            return;
        }
    };

    let (progress, mut updates) = watch::channel(String::new());
    let work = perform(&bot, &context, job, &progress);
    tokio::pin!(work);

    let result = loop {
        tokio::select! {
            result = &mut work => break result,
            Ok(()) = updates.changed() => {
                let text = updates.borrow_and_update().clone();
                status.update(&text).await;
            }
        }
    };

    if let Err(e) = status.finish(&result).await {
        log::error!("Could not report a finished job: {e}\n{result}");
    }
}

async fn perform(bot: &Bot, context: &Context, job: Job, progress: &Progress) -> String {
    match job {
        Job::Upload { file, title } => {
            progress.send_replace("Downloading the video...".to_string());
            let video = match bot.download_file_to_temp(&file, ".mp4").await {
                Ok(video) => video,
                Err(e) => {
                    log::warn!("Failed to fetch a video from Telegram: {e}");
                    return format!("Failed: {e}");
                }
            };
            let request = UploadRequest {
                source_ref: Some(file.unique_id.0.clone()),
                origin_url: None,
                title,
                kind: SourceKind::ChatUpload,
            };
            context
                .process_upload(video.path(), request, progress)
                .await
                .to_string()
        }
        Job::Link { url, title } => context.process_link(&url, title, progress).await.to_string(),
        Job::Thumb { photo, video_id } => {
            progress.send_replace("Downloading the photo...".to_string());
            let mut image = Vec::new();
            if let Err(e) = bot.download_file_to_vec(&photo, &mut image).await {
                log::warn!("Failed to fetch a photo from Telegram: {e}");
                return format!("Failed: {e}");
            }
            context
                .replace_thumbnail(&video_id, image, progress)
                .await
                .to_string()
        }
        Job::Retitle { video_id, title } => {
            context.retitle(&video_id, &title, progress).await.to_string()
        }
        Job::SyncPages => match context.sync_missing_pages(progress).await {
            Ok(report) => report.to_string(),
            Err(e) => format!("Failed: {e}"),
        },
        Job::Reindex => match context.reindex().await {
            Ok(report) if report.changed_anything() => format!(
                "Removed {} duplicates and fixed {} source references. {} videos remain.",
                report.removed, report.fixed, report.remaining
            ),
            Ok(report) => format!("Index is clean, {} videos.", report.remaining),
            Err(e) => format!("Failed: {e}"),
        },
        Job::Gallery => match context.publish_gallery().await {
            Ok(Some(url)) => format!("Gallery published: {url}"),
            Ok(None) => format!(
                "The site has no {} to build a gallery from.",
                context.config.publisher.gallery_template
            ),
            Err(e) => format!("Failed: {e}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn titles_are_numbered_from_one() {
        let titles = vec!["Must Watch".to_string(), "Exclusive".to_string()];
        assert_eq!(list_titles(&titles), "Titles:\n1. Must Watch\n2. Exclusive");
        assert!(list_titles(&[]).contains("/addtitle"));
    }
}
