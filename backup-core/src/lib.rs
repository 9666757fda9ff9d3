pub mod archive;
pub mod config;
pub mod constants;
pub mod crypto;
pub mod db;
pub mod error;
pub mod executor;
pub mod rclone;
pub mod retention;
pub mod schedule;
pub mod scheduler;
pub mod store;

pub use error::{BackupError, Result};

#[cfg(test)]
pub(crate) mod test_support {
    //! 测试用内存传输网关

    use async_trait::async_trait;
    use std::collections::{BTreeMap, HashSet};
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::rclone::{RemoteFile, TransferGateway};
    use crate::store::DestinationBinding;
    use crate::{BackupError, Result};

    /// 内存网关：远程目录是 `profile:dir` 到文件列表的映射
    pub struct MockGateway {
        files: Mutex<BTreeMap<String, Vec<RemoteFile>>>,
        unreachable: Mutex<HashSet<String>>,
        list_failures: Mutex<HashSet<String>>,
        delete_failures: Mutex<HashSet<String>>,
        upload_delay: Mutex<Option<Duration>>,
    }

    impl MockGateway {
        pub fn new() -> Self {
            Self {
                files: Mutex::new(BTreeMap::new()),
                unreachable: Mutex::new(HashSet::new()),
                list_failures: Mutex::new(HashSet::new()),
                delete_failures: Mutex::new(HashSet::new()),
                upload_delay: Mutex::new(None),
            }
        }

        fn key(profile: &str, remote_dir: &str) -> String {
            format!("{}:{}", profile, remote_dir.trim_matches('/'))
        }

        /// 把 profile 标记为不可达，上传和列表都会失败
        pub fn set_unreachable(&self, profile: &str) {
            self.unreachable.lock().unwrap().insert(profile.to_string());
        }

        /// 只让 profile 的列表操作失败，上传不受影响
        pub fn set_list_failure(&self, profile: &str) {
            self.list_failures
                .lock()
                .unwrap()
                .insert(profile.to_string());
        }

        /// 只让指定文件的删除失败，其余删除不受影响
        pub fn set_delete_failure(&self, file_name: &str) {
            self.delete_failures
                .lock()
                .unwrap()
                .insert(file_name.to_string());
        }

        pub fn set_upload_delay(&self, delay: Duration) {
            *self.upload_delay.lock().unwrap() = Some(delay);
        }

        /// 向远程目录预置一个文件
        pub fn seed_file(&self, dest: &DestinationBinding, name: &str) {
            let key = Self::key(&dest.profile, &dest.remote_path);
            self.files
                .lock()
                .unwrap()
                .entry(key)
                .or_default()
                .push(RemoteFile {
                    name: name.to_string(),
                    size: 1,
                });
        }

        /// 远程目录当前的文件名列表（字典序）
        pub fn file_names(&self, dest: &DestinationBinding) -> Vec<String> {
            let key = Self::key(&dest.profile, &dest.remote_path);
            let mut names: Vec<String> = self
                .files
                .lock()
                .unwrap()
                .get(&key)
                .map(|files| files.iter().map(|f| f.name.clone()).collect())
                .unwrap_or_default();
            names.sort();
            names
        }

        fn check_reachable(&self, profile: &str) -> Result<()> {
            if self.unreachable.lock().unwrap().contains(profile) {
                return Err(BackupError::transfer(format!("无法连接到远程: {profile}")));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl TransferGateway for MockGateway {
        async fn upload(&self, local_file: &Path, profile: &str, remote_dir: &str) -> Result<()> {
            let delay = *self.upload_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            self.check_reachable(profile)?;

            let name = local_file
                .file_name()
                .ok_or_else(|| BackupError::transfer("本地文件名无效"))?
                .to_string_lossy()
                .to_string();
            let size = local_file.metadata().map(|m| m.len() as i64).unwrap_or(0);

            let key = Self::key(profile, remote_dir);
            let mut files = self.files.lock().unwrap();
            let entries = files.entry(key).or_default();
            entries.retain(|f| f.name != name);
            entries.push(RemoteFile { name, size });
            Ok(())
        }

        async fn list(&self, profile: &str, remote_dir: &str) -> Result<Vec<RemoteFile>> {
            self.check_reachable(profile)?;
            if self.list_failures.lock().unwrap().contains(profile) {
                return Err(BackupError::transfer(format!("列出远程失败: {profile}")));
            }

            let key = Self::key(profile, remote_dir);
            Ok(self
                .files
                .lock()
                .unwrap()
                .get(&key)
                .cloned()
                .unwrap_or_default())
        }

        async fn delete(&self, profile: &str, remote_dir: &str, file_name: &str) -> Result<()> {
            self.check_reachable(profile)?;
            if self.delete_failures.lock().unwrap().contains(file_name) {
                return Err(BackupError::transfer(format!("删除远程文件失败: {file_name}")));
            }

            let key = Self::key(profile, remote_dir);
            if let Some(entries) = self.files.lock().unwrap().get_mut(&key) {
                entries.retain(|f| f.name != file_name);
            }
            Ok(())
        }
    }
}
