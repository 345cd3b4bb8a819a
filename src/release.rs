//! 发布版本与构建标签
//!
//! CDH 版本字符串必须以 `cdh<数字>` 开头，数字部分即版本号

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{AppError, Result};

static CDH_RELEASE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^cdh(\d+)").expect("valid regex"));

/// 从 `cdh5`、`cdh3u1` 之类的版本字符串中提取数字版本
pub fn cdh_version(release: &str) -> Result<&str> {
    CDH_RELEASE
        .captures(release)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| AppError::ReleaseFormat(release.to_string()))
}

/// 校验构建标签；它会被拼进 `rm -rf <base>/<build>`
pub fn validate_build(build: &str) -> Result<&str> {
    if build.is_empty() {
        return Err(AppError::invalid_build("build label is empty"));
    }
    if build == "." || build == ".." {
        return Err(AppError::InvalidBuild(format!("{:?} is not a build label", build)));
    }
    if build.contains('/') || build.contains('\0') || build.chars().any(char::is_whitespace) {
        return Err(AppError::InvalidBuild(format!(
            "{:?} contains a path separator, whitespace or NUL",
            build
        )));
    }
    Ok(build)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cdh_version() {
        assert_eq!(cdh_version("cdh5").unwrap(), "5");
        assert_eq!(cdh_version("cdh3u1").unwrap(), "3");
        assert_eq!(cdh_version("cdh12").unwrap(), "12");
    }

    #[test]
    fn test_cdh_version_requires_prefix() {
        assert!(matches!(cdh_version("5"), Err(AppError::ReleaseFormat(_))));
        assert!(matches!(cdh_version("CDH5"), Err(AppError::ReleaseFormat(_))));
        assert!(matches!(cdh_version("xcdh5"), Err(AppError::ReleaseFormat(_))));
        assert!(matches!(cdh_version("cdh"), Err(AppError::ReleaseFormat(_))));
        assert!(matches!(cdh_version(""), Err(AppError::ReleaseFormat(_))));
    }

    #[test]
    fn test_validate_build() {
        assert_eq!(validate_build("cdh3u1-20110601").unwrap(), "cdh3u1-20110601");
        assert!(validate_build("").is_err());
        assert!(validate_build("..").is_err());
        assert!(validate_build("a/b").is_err());
        assert!(validate_build("a b").is_err());
    }
}
