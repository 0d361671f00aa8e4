//! Отменяемый таймер с trailing-edge семантикой.
//!
//! Два режима:
//! - [`TimerMode::Debounce`] — каждый `schedule()` сдвигает дедлайн на `window`
//!   от текущего момента; выполняется одно действие после затишья.
//! - [`TimerMode::Throttle`] — первый `schedule()` ставит дедлайн, повторные
//!   вызовы до срабатывания ничего не меняют.
//!
//! В обоих режимах в ожидании не больше одного выполнения. Действие
//! вызывается из собственного потока таймера.

use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use log::{error, trace};

const LOG_TARGET: &str = "bookshelf::timer";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerMode {
    Debounce,
    Throttle,
}

enum Command {
    Schedule,
    Cancel,
    FireNow,
}

/// Поток-таймер. Drop останавливает поток; ожидающее действие отменяется.
#[derive(Debug)]
pub struct CancellableTimer {
    tx: Option<mpsc::Sender<Command>>,
    join: Option<thread::JoinHandle<()>>,
}

impl CancellableTimer {
    pub fn new(mode: TimerMode, window: Duration, action: impl FnMut() + Send + 'static) -> Self {
        let (tx, rx) = mpsc::channel::<Command>();
        let join = thread::spawn(move || run_timer(mode, window, &rx, action));
        Self {
            tx: Some(tx),
            join: Some(join),
        }
    }

    pub fn debounce(window: Duration, action: impl FnMut() + Send + 'static) -> Self {
        Self::new(TimerMode::Debounce, window, action)
    }

    pub fn throttle(window: Duration, action: impl FnMut() + Send + 'static) -> Self {
        Self::new(TimerMode::Throttle, window, action)
    }

    /// Запланировать выполнение (см. режимы выше).
    pub fn schedule(&self) {
        self.send(Command::Schedule);
    }

    /// Отменить ожидающее выполнение, если оно есть.
    pub fn cancel(&self) {
        self.send(Command::Cancel);
    }

    /// Выполнить ожидающее действие немедленно (ничего, если ничего не ждёт).
    pub fn fire_now(&self) {
        self.send(Command::FireNow);
    }

    fn send(&self, cmd: Command) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(cmd);
        }
    }

    /// Остановить поток без выполнения ожидающего действия.
    pub fn shutdown(&mut self) {
        // Закрытый канал — сигнал потоку завершиться.
        self.tx.take();
        if let Some(join) = self.join.take() {
            if join.thread().id() == thread::current().id() {
                // Вызов из самого действия: поток завершится сам.
                return;
            }
            if join.join().is_err() {
                error!(target: LOG_TARGET, "Timer thread panicked");
            }
        }
    }
}

impl Drop for CancellableTimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_timer(
    mode: TimerMode,
    window: Duration,
    rx: &mpsc::Receiver<Command>,
    mut action: impl FnMut(),
) {
    let mut deadline: Option<Instant> = None;

    loop {
        let received = match deadline {
            Some(at) => {
                let now = Instant::now();
                if now >= at {
                    deadline = None;
                    trace!(target: LOG_TARGET, "timer fired");
                    action();
                    continue;
                }
                match rx.recv_timeout(at - now) {
                    Ok(cmd) => cmd,
                    Err(mpsc::RecvTimeoutError::Timeout) => continue,
                    Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match rx.recv() {
                Ok(cmd) => cmd,
                Err(_) => break,
            },
        };

        match received {
            Command::Schedule => {
                if mode == TimerMode::Debounce || deadline.is_none() {
                    deadline = Some(Instant::now() + window);
                }
            }
            Command::Cancel => deadline = None,
            Command::FireNow => {
                if deadline.take().is_some() {
                    action();
                }
            }
        }
    }
}
