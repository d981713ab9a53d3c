//! 后台工作线程
//!
//! 工作表归一个线程所有，其他线程通过消息通道提交请求：
//! - 长时间运行的宏不会阻塞界面线程
//! - 停止标记可以从任意线程置位，宏在下一个检查点退出
//!
//! 每个请求携带自己的应答通道；工作线程退出后请求返回 `Cancelled`。

use crate::error::{SheetError, SheetResult};
use crate::worksheet::{Drawable, StopHandle, Worksheet};
use crossbeam::channel::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

/// 发往工作线程的请求
pub enum Request {
    Execute(String, Sender<SheetResult<String>>),
    Undo(Sender<SheetResult<bool>>),
    Redo(Sender<SheetResult<bool>>),
    Save(Sender<String>),
    Load(String, Sender<SheetResult<()>>),
    RunMacro(String, Sender<SheetResult<String>>),
    Drawables(Sender<Vec<Drawable>>),
    Shutdown,
}

/// 持有工作表的后台线程
pub struct WorksheetWorker {
    sender: Sender<Request>,
    handle: Option<JoinHandle<Worksheet>>,
    stop: StopHandle,
}

impl WorksheetWorker {
    /// 把工作表移入新线程
    pub fn spawn(sheet: Worksheet) -> Self {
        let (sender, receiver) = channel::unbounded();
        let stop = sheet.stop_handle();
        let handle = thread::Builder::new()
            .name("geosheet-worker".to_string())
            .spawn(move || Self::serve(sheet, receiver))
            .map_err(|e| tracing::error!("failed to spawn worker thread: {}", e))
            .ok();
        Self {
            sender,
            handle,
            stop,
        }
    }

    fn serve(mut sheet: Worksheet, receiver: Receiver<Request>) -> Worksheet {
        tracing::debug!("worker started");
        // 调用者可能已经放弃等待，应答失败时忽略
        for request in receiver.iter() {
            match request {
                Request::Execute(command, reply) => {
                    let _ = reply.send(sheet.execute(&command));
                }
                Request::Undo(reply) => {
                    let _ = reply.send(sheet.undo());
                }
                Request::Redo(reply) => {
                    let _ = reply.send(sheet.redo());
                }
                Request::Save(reply) => {
                    let _ = reply.send(sheet.save());
                }
                Request::Load(text, reply) => {
                    let _ = reply.send(sheet.load(&text));
                }
                Request::RunMacro(name, reply) => {
                    let _ = reply.send(sheet.run_macro(&name));
                }
                Request::Drawables(reply) => {
                    let _ = reply.send(sheet.drawables());
                }
                Request::Shutdown => break,
            }
        }
        tracing::debug!("worker stopped");
        sheet
    }

    fn request<T>(&self, make: impl FnOnce(Sender<T>) -> Request) -> SheetResult<T> {
        let (reply, response) = channel::bounded(1);
        self.sender
            .send(make(reply))
            .map_err(|_| SheetError::Cancelled)?;
        response.recv().map_err(|_| SheetError::Cancelled)
    }

    pub fn execute(&self, command: &str) -> SheetResult<String> {
        self.request(|reply| Request::Execute(command.to_string(), reply))?
    }

    /// 提交命令但不等待结果
    pub fn execute_async(&self, command: &str) -> Receiver<SheetResult<String>> {
        let (reply, response) = channel::bounded(1);
        if let Err(err) = self.sender.send(Request::Execute(command.to_string(), reply)) {
            tracing::warn!("worker is gone, dropping {:?}", command);
            if let Request::Execute(_, reply) = err.into_inner() {
                let _ = reply.send(Err(SheetError::Cancelled));
            }
        }
        response
    }

    pub fn undo(&self) -> SheetResult<bool> {
        self.request(Request::Undo)?
    }

    pub fn redo(&self) -> SheetResult<bool> {
        self.request(Request::Redo)?
    }

    pub fn save(&self) -> SheetResult<String> {
        self.request(Request::Save)
    }

    pub fn load(&self, text: &str) -> SheetResult<()> {
        self.request(|reply| Request::Load(text.to_string(), reply))?
    }

    pub fn run_macro(&self, name: &str) -> SheetResult<String> {
        self.request(|reply| Request::RunMacro(name.to_string(), reply))?
    }

    pub fn drawables(&self) -> SheetResult<Vec<Drawable>> {
        self.request(Request::Drawables)
    }

    /// 停止标记；置位后正在运行的宏在下一个检查点退出
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// 关闭线程并取回工作表
    pub fn shutdown(mut self) -> Option<Worksheet> {
        self.join()
    }

    fn join(&mut self) -> Option<Worksheet> {
        let handle = self.handle.take()?;
        let _ = self.sender.send(Request::Shutdown);
        match handle.join() {
            Ok(sheet) => Some(sheet),
            Err(_) => {
                tracing::error!("worker thread panicked");
                None
            }
        }
    }
}

impl Drop for WorksheetWorker {
    fn drop(&mut self) {
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorksheetConfig;
    use crate::worksheet::Macro;
    use std::time::Duration;

    #[test]
    fn test_requests_round_trip() {
        let worker = WorksheetWorker::spawn(Worksheet::new());
        assert_eq!(worker.execute("A = (1, 2)").unwrap(), "Command executed.");
        assert_eq!(worker.execute("A.y").unwrap(), "2");
        assert!(worker.save().unwrap().ends_with("A = Point(1, 2)"));
        assert!(worker.undo().unwrap());
        assert!(!worker.save().unwrap().contains("A = "));
        assert_eq!(worker.drawables().unwrap().len(), 0);

        let sheet = worker.shutdown().unwrap();
        assert!(sheet.registry().is_empty());
    }

    #[test]
    fn test_async_execute() {
        let worker = WorksheetWorker::spawn(Worksheet::new());
        let pending = worker.execute_async("k = 3");
        assert_eq!(pending.recv().unwrap().unwrap(), "Command executed.");
        assert_eq!(worker.execute("k * 2").unwrap(), "6");
    }

    #[test]
    fn test_stop_running_macro() {
        let config = WorksheetConfig {
            pause_ms: 20,
            ..WorksheetConfig::default()
        };
        let mut sheet = Worksheet::with_config(config);
        sheet.add_macro("forever", Macro::new("for i in range(1000):\n    pause()"));
        let worker = WorksheetWorker::spawn(sheet);

        let (reply, response) = channel::bounded(1);
        worker
            .sender
            .send(Request::RunMacro("forever".to_string(), reply))
            .unwrap();
        thread::sleep(Duration::from_millis(50));
        worker.stop_handle().stop();

        let result = response.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(matches!(result, Err(SheetError::Cancelled)));
        assert_eq!(worker.execute("1 + 1").unwrap(), "2");
    }

    #[test]
    fn test_stop_requested_before_macro_starts() {
        let mut sheet = Worksheet::new();
        sheet.add_macro("count", Macro::new("for i in range(3):\n    pause()\n    k = i"));
        let worker = WorksheetWorker::spawn(sheet);

        worker.stop_handle().stop();
        assert!(matches!(worker.run_macro("count"), Err(SheetError::Cancelled)));
        assert!(worker.run_macro("count").is_ok());
        assert_eq!(worker.execute("k").unwrap(), "2");
    }
}
