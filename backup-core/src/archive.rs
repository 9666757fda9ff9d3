//! 备份压缩模块
//!
//! 把源文件或目录打成 tar.gz / zip 压缩包。压缩在后台线程中执行，
//! 避免阻塞异步运行时。归档内部统一使用 Unix 风格路径。

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::{BackupError, Result};

/// 把 `source` 打成 tar.gz 压缩包写到 `dest`
///
/// 源为目录时，归档内以目录名为顶层目录；源为单个文件时直接以文件名入档。
pub async fn create_tar_gz(source: &Path, dest: &Path) -> Result<()> {
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use tar::Builder;

    let source = source.to_path_buf();
    let dest = dest.to_path_buf();

    debug!("创建 tar.gz 压缩包: {} -> {}", source.display(), dest.display());

    tokio::task::spawn_blocking(move || {
        let file = File::create(&dest)?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut archive = Builder::new(encoder);

        let root_name = entry_name(&source)?;

        if source.is_dir() {
            for entry in WalkDir::new(&source) {
                let entry = entry?;
                let path = entry.path();

                if path.is_file() {
                    let relative_path = path.strip_prefix(&source)?;
                    archive
                        .append_path_with_name(path, archive_path(&root_name, relative_path))
                        .map_err(|e| BackupError::archive(format!("添加文件到归档失败: {e}")))?;
                }
            }
        } else {
            archive
                .append_path_with_name(&source, &root_name)
                .map_err(|e| BackupError::archive(format!("添加文件到归档失败: {e}")))?;
        }

        archive
            .finish()
            .map_err(|e| BackupError::archive(format!("完成归档失败: {e}")))?;

        Ok::<(), BackupError>(())
    })
    .await??;

    Ok(())
}

/// 把 `source` 打成 zip 压缩包写到 `dest`
pub async fn create_zip(source: &Path, dest: &Path) -> Result<()> {
    use zip::ZipWriter;
    use zip::write::SimpleFileOptions;

    let source = source.to_path_buf();
    let dest = dest.to_path_buf();

    debug!("创建 zip 压缩包: {} -> {}", source.display(), dest.display());

    tokio::task::spawn_blocking(move || {
        let file = File::create(&dest)?;
        let mut zip = ZipWriter::new(file);
        let options = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);

        let root_name = entry_name(&source)?;
        let mut buffer = Vec::new();

        if source.is_dir() {
            for entry in WalkDir::new(&source) {
                let entry = entry?;
                let path = entry.path();

                if path.is_file() {
                    let relative_path = path.strip_prefix(&source)?;
                    zip.start_file(archive_path(&root_name, relative_path), options)?;

                    let mut f = File::open(path)?;
                    buffer.clear();
                    f.read_to_end(&mut buffer)?;
                    zip.write_all(&buffer)?;
                }
            }
        } else {
            zip.start_file(&root_name, options)?;
            let mut f = File::open(&source)?;
            buffer.clear();
            f.read_to_end(&mut buffer)?;
            zip.write_all(&buffer)?;
        }

        zip.finish()
            .map_err(|e| BackupError::archive(format!("完成归档失败: {e}")))?;

        Ok::<(), BackupError>(())
    })
    .await??;

    Ok(())
}

/// 解包 tar.gz 压缩包到目标目录
pub async fn extract_tar_gz(archive_path: &Path, target_dir: &Path) -> Result<()> {
    use flate2::read::GzDecoder;
    use tar::Archive;

    tokio::fs::create_dir_all(target_dir).await?;

    let archive_path = archive_path.to_path_buf();
    let target_dir = target_dir.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let file = File::open(&archive_path)?;
        let mut archive = Archive::new(GzDecoder::new(file));
        archive
            .unpack(&target_dir)
            .map_err(|e| BackupError::archive(format!("解包失败: {e}")))?;
        Ok::<(), BackupError>(())
    })
    .await??;

    Ok(())
}

/// 解包 zip 压缩包到目标目录
pub async fn extract_zip(archive_path: &Path, target_dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(target_dir).await?;

    let archive_path = archive_path.to_path_buf();
    let target_dir = target_dir.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let file = File::open(&archive_path)?;
        let mut archive = zip::ZipArchive::new(file)?;
        archive
            .extract(&target_dir)
            .map_err(|e| BackupError::archive(format!("解包失败: {e}")))?;
        Ok::<(), BackupError>(())
    })
    .await??;

    Ok(())
}

/// 计算路径占用的总字节数（目录递归累计，不可读的条目跳过）
pub async fn path_size(path: &Path) -> Result<i64> {
    let path = path.to_path_buf();

    let total = tokio::task::spawn_blocking(move || {
        if path.is_file() {
            return Ok::<i64, BackupError>(path.metadata()?.len() as i64);
        }

        let mut total: i64 = 0;
        for entry in WalkDir::new(&path).into_iter().filter_map(|e| e.ok()) {
            if entry.path().is_file() {
                total += entry.metadata().map(|m| m.len() as i64).unwrap_or(0);
            }
        }
        Ok(total)
    })
    .await??;

    Ok(total)
}

fn entry_name(source: &Path) -> Result<String> {
    Ok(source
        .file_name()
        .ok_or_else(|| BackupError::archive(format!("无法获取源名称: {}", source.display())))?
        .to_string_lossy()
        .to_string())
}

fn archive_path(root_name: &str, relative_path: &Path) -> String {
    // tar/zip 归档内部统一使用 Unix 风格分隔符
    if cfg!(windows) {
        format!(
            "{}/{}",
            root_name,
            relative_path.display().to_string().replace('\\', "/")
        )
    } else {
        format!("{}/{}", root_name, relative_path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::fs;
    use tar::Archive;
    use tempfile::tempdir;

    fn build_source(root: &Path) -> PathBuf {
        let source = root.join("app");
        fs::create_dir_all(source.join("sub")).unwrap();
        fs::write(source.join("a.txt"), b"hello").unwrap();
        fs::write(source.join("sub").join("b.txt"), b"world").unwrap();
        source
    }

    #[tokio::test]
    async fn test_tar_gz_roundtrip() {
        let dir = tempdir().unwrap();
        let source = build_source(dir.path());
        let dest = dir.path().join("app.tar.gz");

        create_tar_gz(&source, &dest).await.unwrap();
        assert!(dest.exists());

        // 解包后目录结构和内容一致
        let restore = dir.path().join("restore");
        extract_tar_gz(&dest, &restore).await.unwrap();

        assert_eq!(fs::read(restore.join("app/a.txt")).unwrap(), b"hello");
        assert_eq!(fs::read(restore.join("app/sub/b.txt")).unwrap(), b"world");
    }

    #[tokio::test]
    async fn test_tar_gz_single_file() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("note.txt");
        fs::write(&source, b"content").unwrap();
        let dest = dir.path().join("note.tar.gz");

        create_tar_gz(&source, &dest).await.unwrap();

        let file = File::open(&dest).unwrap();
        let mut archive = Archive::new(GzDecoder::new(file));
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect();

        assert_eq!(names, vec!["note.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_zip_roundtrip() {
        let dir = tempdir().unwrap();
        let source = build_source(dir.path());
        let dest = dir.path().join("app.zip");

        create_zip(&source, &dest).await.unwrap();

        let restore = dir.path().join("restore");
        extract_zip(&dest, &restore).await.unwrap();

        assert_eq!(fs::read(restore.join("app/a.txt")).unwrap(), b"hello");
        assert_eq!(fs::read(restore.join("app/sub/b.txt")).unwrap(), b"world");
    }

    #[tokio::test]
    async fn test_path_size() {
        let dir = tempdir().unwrap();
        let source = build_source(dir.path());

        let size = path_size(&source).await.unwrap();
        assert_eq!(size, 10);
    }
}
