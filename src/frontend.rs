//! Front-end protocol
//!
//! Every user interaction goes through the [`FrontEnd`] trait: blocking
//! questions, yes/no approvals, status lines and a hook fired after the
//! configuration changes on disk.
//!
//! Long operations run on a worker thread while the UI owns the main thread.
//! [`prompt_channel`] connects the two: the worker holds a [`ChannelFrontEnd`]
//! and the main thread drains requests with [`PromptServer::serve`]. The
//! request channel has capacity 1 and each question carries its own reply
//! channel, so at most one question is ever outstanding.

use crate::error::{DedetaiError, Result};
use std::sync::Mutex;
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use tracing::{debug, error, info, warn};

/// Option that asks the front-end for a free-form directory
pub const PROMPT_OPTION_DIRECTORY: &str = "Choose Directory";
/// Option that asks the front-end for a free-form existing file
pub const PROMPT_OPTION_FILE: &str = "Choose File";
/// All options that trigger a follow-up path entry
pub const PROMPT_OPTION_SIGILS: &[&str] = &[PROMPT_OPTION_DIRECTORY, PROMPT_OPTION_FILE];

/// Option meaning "fetch this binary for me"
pub const DOWNLOAD: &str = "Download";

/// Returns true if the answer is one of the follow-up sigils
pub fn is_prompt_sigil(answer: &str) -> bool {
    PROMPT_OPTION_SIGILS.contains(&answer)
}

/// User-facing side of every operation.
pub trait FrontEnd: Send + Sync {
    /// Block until the user picks an answer. The first option is the default.
    fn ask(&self, question: &str, options: &[String]) -> Result<String>;

    /// Yes/no question built on top of [`FrontEnd::ask`].
    fn approve(&self, question: &str, context: Option<&str>) -> Result<bool> {
        let question = match context {
            Some(context) => format!("{question}\n{context}"),
            None => question.to_string(),
        };
        let options = vec!["Yes".to_string(), "No".to_string()];
        Ok(self.ask(&question, &options)? == "Yes")
    }

    /// Report progress. `percent` is already clamped to 0..=100.
    fn status(&self, message: &str, percent: Option<u8>);

    /// Called after the persisted configuration was rewritten.
    fn config_changed(&self) {}
}

/// Front-end for unattended runs: every question is a hard failure.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessFrontEnd;

impl FrontEnd for HeadlessFrontEnd {
    fn ask(&self, question: &str, _options: &[String]) -> Result<String> {
        error!("CRITICAL: cannot ask \"{}\" without an interactive front-end", question);
        Err(DedetaiError::headless(question.to_string()))
    }

    fn status(&self, message: &str, percent: Option<u8>) {
        match percent {
            Some(p) => info!("[{:>3}%] {}", p, message),
            None => info!("{}", message),
        }
    }
}

enum Request {
    Ask {
        question: String,
        options: Vec<String>,
        reply: SyncSender<Option<String>>,
    },
    Status {
        message: String,
        percent: Option<u8>,
    },
    ConfigChanged,
}

/// Worker-side handle that forwards every call to the [`PromptServer`].
pub struct ChannelFrontEnd {
    tx: SyncSender<Request>,
    ask_lock: Mutex<()>,
}

/// UI-side end of the rendezvous channel.
pub struct PromptServer {
    rx: Receiver<Request>,
}

/// Create a connected worker handle and UI server.
pub fn prompt_channel() -> (ChannelFrontEnd, PromptServer) {
    let (tx, rx) = sync_channel(1);
    (
        ChannelFrontEnd {
            tx,
            ask_lock: Mutex::new(()),
        },
        PromptServer { rx },
    )
}

impl FrontEnd for ChannelFrontEnd {
    fn ask(&self, question: &str, options: &[String]) -> Result<String> {
        let _outstanding = self
            .ask_lock
            .lock()
            .map_err(|_| DedetaiError::general("prompt lock poisoned"))?;

        let (reply, answer) = sync_channel(1);
        self.tx
            .send(Request::Ask {
                question: question.to_string(),
                options: options.to_vec(),
                reply,
            })
            .map_err(|_| DedetaiError::cancelled("front-end is gone"))?;

        match answer.recv() {
            Ok(Some(answer)) => Ok(answer),
            Ok(None) | Err(_) => Err(DedetaiError::cancelled(format!(
                "no answer for \"{question}\""
            ))),
        }
    }

    fn status(&self, message: &str, percent: Option<u8>) {
        let request = Request::Status {
            message: message.to_string(),
            percent,
        };
        if self.tx.send(request).is_err() {
            debug!("Status dropped, front-end is gone: {}", message);
        }
    }

    fn config_changed(&self) {
        let _ = self.tx.send(Request::ConfigChanged);
    }
}

impl PromptServer {
    /// Serve requests until every [`ChannelFrontEnd`] has been dropped.
    pub fn serve(self, frontend: &dyn FrontEnd) {
        for request in self.rx {
            match request {
                Request::Ask {
                    question,
                    options,
                    reply,
                } => {
                    let answer = match frontend.ask(&question, &options) {
                        Ok(answer) => Some(answer),
                        Err(e) => {
                            warn!("Question \"{}\" went unanswered: {}", question, e);
                            None
                        }
                    };
                    let _ = reply.send(answer);
                }
                Request::Status { message, percent } => frontend.status(&message, percent),
                Request::ConfigChanged => frontend.config_changed(),
            }
        }
        debug!("Prompt server finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FirstOption {
        asked: AtomicUsize,
        statuses: Mutex<Vec<(String, Option<u8>)>>,
    }

    impl FrontEnd for FirstOption {
        fn ask(&self, _question: &str, options: &[String]) -> Result<String> {
            self.asked.fetch_add(1, Ordering::SeqCst);
            options
                .first()
                .cloned()
                .ok_or_else(|| DedetaiError::general("no options"))
        }

        fn status(&self, message: &str, percent: Option<u8>) {
            if let Ok(mut statuses) = self.statuses.lock() {
                statuses.push((message.to_string(), percent));
            }
        }
    }

    #[test]
    fn test_sigils() {
        assert!(is_prompt_sigil("Choose Directory"));
        assert!(!is_prompt_sigil("Logos"));
    }

    #[test]
    fn test_headless_ask_fails() {
        let err = HeadlessFrontEnd
            .ask("Choose which FaithLife product", &["Logos".to_string()])
            .unwrap_err();
        assert!(matches!(err, DedetaiError::Headless(_)));
    }

    #[test]
    fn test_channel_round_trip() {
        let (client, server) = prompt_channel();
        let ui = FirstOption {
            asked: AtomicUsize::new(0),
            statuses: Mutex::new(Vec::new()),
        };

        let worker = std::thread::spawn(move || {
            client.status("Starting", Some(0));
            let answer = client.ask("Product?", &["Logos".to_string(), "Verbum".to_string()]);
            let approved = client.approve("Continue?", None);
            (answer.ok(), approved.ok())
        });

        server.serve(&ui);
        let (answer, approved) = worker.join().unwrap();

        assert_eq!(answer.as_deref(), Some("Logos"));
        assert_eq!(approved, Some(true));
        assert_eq!(ui.asked.load(Ordering::SeqCst), 2);
        assert_eq!(ui.statuses.lock().unwrap()[0], ("Starting".to_string(), Some(0)));
    }

    #[test]
    fn test_concurrent_askers_are_serialized() {
        let (client, server) = prompt_channel();
        let client = Arc::new(client);
        let ui = FirstOption {
            asked: AtomicUsize::new(0),
            statuses: Mutex::new(Vec::new()),
        };

        let workers: Vec<_> = (0..4)
            .map(|i| {
                let client = Arc::clone(&client);
                std::thread::spawn(move || client.ask("Which?", &[format!("answer-{i}")]).ok())
            })
            .collect();
        drop(client);

        server.serve(&ui);
        let mut answers: Vec<_> = workers.into_iter().filter_map(|w| w.join().unwrap()).collect();
        answers.sort();
        assert_eq!(answers, vec!["answer-0", "answer-1", "answer-2", "answer-3"]);
    }

    #[test]
    fn test_ask_after_server_gone_is_cancelled() {
        let (client, server) = prompt_channel();
        drop(server);
        let err = client.ask("Product?", &["Logos".to_string()]).unwrap_err();
        assert!(matches!(err, DedetaiError::Cancelled(_)));
    }
}
