// Copyright 2025 OPPO.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::conf::LogConf;
use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

// Keeps the background writer alive for the lifetime of the process.
static LOG_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

pub struct Logger;

impl Logger {
    /// Installs the global tracing subscriber and routes `log` records into it.
    /// Writes to stdout when `log_dir` is empty, otherwise to a daily rolling file.
    /// Calling it more than once is a no-op.
    pub fn init(conf: LogConf) {
        if LOG_GUARD.get().is_some() {
            return;
        }

        let to_stdout = conf.log_dir.is_empty();
        let (writer, guard) = if to_stdout {
            tracing_appender::non_blocking(std::io::stdout())
        } else {
            let appender = tracing_appender::rolling::daily(&conf.log_dir, &conf.file_name);
            tracing_appender::non_blocking(appender)
        };

        let filter = EnvFilter::try_new(&conf.level).unwrap_or_else(|_| EnvFilter::new("info"));
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(to_stdout && conf.ansi)
            .with_thread_names(conf.display_thread)
            .with_target(conf.display_target)
            .finish();

        if tracing::subscriber::set_global_default(subscriber).is_err() {
            return;
        }
        let _ = tracing_log::LogTracer::init();
        let _ = LOG_GUARD.set(guard);
    }

    pub fn default() {
        Self::init(LogConf::default())
    }
}
