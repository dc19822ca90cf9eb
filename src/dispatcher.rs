//! Interprets a parsed command against a `QueueRegistry` and produces a
//! reply. One `CommandDispatcher` is created per connection; its reusable
//! output buffer lives for the life of the connection rather than being
//! allocated per command.

use std::time::Duration;

use crate::error::MqError;
use crate::metrics::OpCounter;
use crate::registry::QueueRegistry;
use crate::resp::Reply;
use crate::ring_buffer::MAX_ELEMENT;

/// Signals the connection loop what to do after a command is handled.
pub enum Action {
    Reply(Reply),
    Close(Reply),
}

fn reply(r: Reply) -> Action {
    Action::Reply(r)
}

pub struct CommandDispatcher<'a> {
    registry: &'a QueueRegistry,
    metrics: &'a OpCounter,
    /// Sized once to `MAX_ELEMENT` and reused across every `Get`/`BRPOP`
    /// call on this connection instead of allocating per command.
    scratch: Vec<u8>,
}

impl<'a> CommandDispatcher<'a> {
    pub fn new(registry: &'a QueueRegistry, metrics: &'a OpCounter) -> Self {
        Self {
            registry,
            metrics,
            scratch: vec![0u8; MAX_ELEMENT],
        }
    }

    pub async fn dispatch(&mut self, args: Vec<Vec<u8>>) -> Action {
        let Some(verb) = args.first() else {
            return reply(Reply::Error("ERR empty command".to_string()));
        };
        let verb = String::from_utf8_lossy(verb).to_ascii_uppercase();
        self.metrics.record();

        match verb.as_str() {
            "PING" => reply(Reply::SimpleString("PONG".to_string())),
            "QUIT" => Action::Close(Reply::ok()),
            "ECHO" => match args.get(1) {
                Some(msg) => reply(Reply::Bulk(Some(msg.clone()))),
                None => reply(wrong_args("ECHO")),
            },
            "INFO" => reply(Reply::Bulk(Some(self.info_text().into_bytes()))),
            "KEYS" => {
                let mut names = self.registry.queues();
                names.sort();
                reply(Reply::Array(names.into_iter().map(String::into_bytes).collect()))
            }
            "LLEN" => match args.get(1) {
                Some(name) => reply(self.llen(name)),
                None => reply(wrong_args("LLEN")),
            },
            "LPUSH" => match (args.get(1), args.get(2)) {
                (Some(name), Some(payload)) => reply(self.lpush(name, payload)),
                _ => reply(wrong_args("LPUSH")),
            },
            "RPOP" => match args.get(1) {
                Some(name) => reply(self.rpop(name)),
                None => reply(wrong_args("RPOP")),
            },
            "DEL" => match args.get(1) {
                Some(name) => reply(self.del(name)),
                None => reply(wrong_args("DEL")),
            },
            "BRPOP" => match (args.get(1), args.get(2)) {
                (Some(name), Some(timeout)) => reply(self.brpop(name, timeout).await),
                _ => reply(wrong_args("BRPOP")),
            },
            other => reply(Reply::Error(format!("ERR unsupported command '{other}'"))),
        }
    }

    fn info_text(&self) -> String {
        format!(
            "mqueued\r\nqueues:{}\r\nops_per_sec:{}\r\n",
            self.registry.queues().len(),
            self.metrics.last_rate()
        )
    }

    fn queue_name(name: &[u8]) -> Result<&str, Reply> {
        std::str::from_utf8(name).map_err(|_| Reply::Error("ERR invalid queue name".to_string()))
    }

    fn llen(&self, name: &[u8]) -> Reply {
        let name = match Self::queue_name(name) {
            Ok(n) => n,
            Err(e) => return e,
        };
        match self.registry.get_or_create(name) {
            Ok(q) => Reply::Integer(q.len() as i64),
            Err(e) => err_reply(e),
        }
    }

    fn lpush(&self, name: &[u8], payload: &[u8]) -> Reply {
        let name = match Self::queue_name(name) {
            Ok(n) => n,
            Err(e) => return e,
        };
        match self.registry.get_or_create(name) {
            Ok(q) => match q.put(payload) {
                Ok(()) => Reply::Integer(q.len() as i64),
                Err(e) => err_reply(e),
            },
            Err(e) => err_reply(e),
        }
    }

    fn rpop(&mut self, name: &[u8]) -> Reply {
        let name = match Self::queue_name(name) {
            Ok(n) => n,
            Err(e) => return e,
        };
        let q = match self.registry.get_or_create(name) {
            Ok(q) => q,
            Err(e) => return err_reply(e),
        };
        match q.get(&mut self.scratch) {
            Ok(n) => Reply::Bulk(Some(self.scratch[..n].to_vec())),
            Err(MqError::Empty) => Reply::nil(),
            Err(e) => err_reply(e),
        }
    }

    fn del(&self, name: &[u8]) -> Reply {
        let name = match Self::queue_name(name) {
            Ok(n) => n,
            Err(e) => return e,
        };
        match self.registry.delete(name) {
            Ok(()) => Reply::ok(),
            Err(e) => err_reply(e),
        }
    }

    /// Non-blocking `RPOP` first; on empty, parks as a waiter and races the
    /// hand-off against `timeout` seconds (0 means "try once, don't wait").
    async fn brpop(&mut self, name: &[u8], timeout: &[u8]) -> Reply {
        let name = match Self::queue_name(name) {
            Ok(n) => n,
            Err(e) => return e,
        };
        let timeout_secs: f64 = match std::str::from_utf8(timeout).ok().and_then(|s| s.parse().ok()) {
            Some(t) => t,
            None => return Reply::Error("ERR timeout is not a valid number".to_string()),
        };

        let q = match self.registry.get_or_create(name) {
            Ok(q) => q,
            Err(e) => return err_reply(e),
        };

        let (result, waiter) = q.get_or_park(&mut self.scratch);
        match result {
            Ok(n) => return Reply::Bulk(Some(self.scratch[..n].to_vec())),
            Err(e) if !e.is_empty() => return err_reply(e),
            Err(_) => {}
        }

        let Some(mut rx) = waiter else {
            return Reply::nil();
        };

        if timeout_secs <= 0.0 {
            return match rx.try_recv() {
                Ok(payload) => Reply::Bulk(Some(payload)),
                Err(_) => Reply::nil(),
            };
        }

        match tokio::time::timeout(Duration::from_secs_f64(timeout_secs), rx).await {
            Ok(Ok(payload)) => Reply::Bulk(Some(payload)),
            Ok(Err(_)) | Err(_) => Reply::nil(),
        }
    }
}

fn wrong_args(cmd: &str) -> Reply {
    Reply::Error(format!("ERR wrong number of arguments for '{cmd}'"))
}

fn err_reply(e: MqError) -> Reply {
    Reply::Error(format!("ERR {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryDefaults;
    use tempfile::tempdir;

    fn dispatcher_env(dir: &std::path::Path) -> (QueueRegistry, OpCounter) {
        (
            QueueRegistry::new(RegistryDefaults {
                data_dir: dir.to_path_buf(),
                file_block_unit: 4096,
                cache_size: 512,
            }),
            OpCounter::new(),
        )
    }

    fn bulk(s: &str) -> Vec<u8> {
        s.as_bytes().to_vec()
    }

    fn reply_of(action: Action) -> Reply {
        match action {
            Action::Reply(r) => r,
            Action::Close(r) => r,
        }
    }

    #[tokio::test]
    async fn ping_pong() {
        let dir = tempdir().unwrap();
        let (reg, metrics) = dispatcher_env(dir.path());
        let mut d = CommandDispatcher::new(&reg, &metrics);
        let r = reply_of(d.dispatch(vec![bulk("PING")]).await);
        assert!(matches!(r, Reply::SimpleString(s) if s == "PONG"));
    }

    #[tokio::test]
    async fn lpush_then_rpop_round_trips() {
        let dir = tempdir().unwrap();
        let (reg, metrics) = dispatcher_env(dir.path());
        let mut d = CommandDispatcher::new(&reg, &metrics);

        let r = reply_of(d.dispatch(vec![bulk("LPUSH"), bulk("q1"), bulk("hello")]).await);
        assert!(matches!(r, Reply::Integer(1)));

        let r = reply_of(d.dispatch(vec![bulk("RPOP"), bulk("q1")]).await);
        assert!(matches!(r, Reply::Bulk(Some(v)) if v == b"hello"));

        let r = reply_of(d.dispatch(vec![bulk("RPOP"), bulk("q1")]).await);
        assert!(matches!(r, Reply::Bulk(None)));
    }

    #[tokio::test]
    async fn brpop_times_out_on_empty_queue() {
        let dir = tempdir().unwrap();
        let (reg, metrics) = dispatcher_env(dir.path());
        let mut d = CommandDispatcher::new(&reg, &metrics);
        let r = reply_of(d.dispatch(vec![bulk("BRPOP"), bulk("q1"), bulk("0")]).await);
        assert!(matches!(r, Reply::Bulk(None)));
    }

    #[tokio::test]
    async fn brpop_receives_a_concurrent_push() {
        let dir = tempdir().unwrap();
        let (reg, metrics) = dispatcher_env(dir.path());
        let mut d = CommandDispatcher::new(&reg, &metrics);

        let q = reg.get_or_create("q1").unwrap();
        let producer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            q.put(b"late").unwrap();
        });

        let r = reply_of(d.dispatch(vec![bulk("BRPOP"), bulk("q1"), bulk("1")]).await);
        producer.await.unwrap();
        assert!(matches!(r, Reply::Bulk(Some(v)) if v == b"late"));
    }

    #[tokio::test]
    async fn unknown_command_is_an_error() {
        let dir = tempdir().unwrap();
        let (reg, metrics) = dispatcher_env(dir.path());
        let mut d = CommandDispatcher::new(&reg, &metrics);
        let r = reply_of(d.dispatch(vec![bulk("FROBNICATE")]).await);
        assert!(matches!(r, Reply::Error(_)));
    }

    #[tokio::test]
    async fn keys_lists_created_queues_sorted() {
        let dir = tempdir().unwrap();
        let (reg, metrics) = dispatcher_env(dir.path());
        let mut d = CommandDispatcher::new(&reg, &metrics);
        d.dispatch(vec![bulk("LPUSH"), bulk("beta"), bulk("x")]).await;
        d.dispatch(vec![bulk("LPUSH"), bulk("alpha"), bulk("x")]).await;
        let r = reply_of(d.dispatch(vec![bulk("KEYS")]).await);
        assert!(matches!(r, Reply::Array(v) if v == vec![b"alpha".to_vec(), b"beta".to_vec()]));
    }
}
