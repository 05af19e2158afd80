use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::agenda::{
  SortMode,
  Tab
};
use crate::finder::DEFAULT_MAX_ITERATIONS;
use crate::holiday::HolidaySet;

const RC_ENV_VAR: &str = "TEMPORC";
const RC_FILE_NAME: &str = ".temporc";

#[derive(Debug, Clone)]
pub struct Config {
  map:              HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Config {
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::defaults();

    let rc = resolve_rc_path(
      rc_override
    )?;
    if let Some(path) = rc {
      info!(rc = %path.display(), "loading rc file");
      cfg.load_file(&path)?;
    } else {
      warn!(
        "no rc file found; using \
         defaults"
      );
    }

    Ok(cfg)
  }

  pub fn defaults() -> Self {
    let mut map = HashMap::new();
    for (key, value) in [
      ("data.location", "~/.tempo"),
      ("default.tab", "incomplete"),
      ("default.sort", "deadline"),
      ("color", "on")
    ] {
      map.insert(
        key.to_string(),
        value.to_string()
      );
    }
    Config {
      map,
      loaded_files: vec![]
    }
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  pub fn get_bool(
    &self,
    key: &str
  ) -> Option<bool> {
    self
      .map
      .get(key)
      .map(|v| parse_bool(v))
  }

  pub fn default_tab(
    &self
  ) -> anyhow::Result<Tab> {
    self
      .get("default.tab")
      .map(|raw| raw.parse::<Tab>())
      .transpose()
      .context(
        "invalid default.tab setting"
      )
      .map(Option::unwrap_or_default)
  }

  pub fn default_sort(
    &self
  ) -> anyhow::Result<SortMode> {
    self
      .get("default.sort")
      .map(|raw| {
        raw.parse::<SortMode>()
      })
      .transpose()
      .context(
        "invalid default.sort setting"
      )
      .map(Option::unwrap_or_default)
  }

  /// Iteration cap for the occurrence
  /// search.
  pub fn search_horizon(
    &self
  ) -> anyhow::Result<usize> {
    let Some(raw) =
      self.get("search.horizon")
    else {
      return Ok(
        DEFAULT_MAX_ITERATIONS
      );
    };
    let value: usize = raw
      .trim()
      .parse()
      .with_context(|| {
        format!(
          "invalid search.horizon: \
           {raw}"
        )
      })?;
    if value == 0 {
      return Err(anyhow!(
        "search.horizon must be \
         positive"
      ));
    }
    Ok(value)
  }

  #[tracing::instrument(skip(self))]
  pub fn holidays(
    &self
  ) -> anyhow::Result<HolidaySet> {
    match self.get("holidays.file") {
      | Some(raw)
        if !raw.trim().is_empty() =>
      {
        HolidaySet::load(&expand_tilde(
          Path::new(raw.trim())
        ))
      }
      | _ => Ok(HolidaySet::default())
    }
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;

    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .map(|p| p.to_path_buf())
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let line = raw_line
        .split_once('#')
        .map_or(raw_line, |(before, _)| {
          before
        })
        .trim();
      if line.is_empty() {
        continue;
      }

      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let include_path =
          resolve_include_path(
            &base_dir,
            include_rest.trim()
          )?;
        debug!(
            file = %path.display(),
            include = %include_path.display(),
            line = line_num + 1,
            "processing include"
        );

        if include_path.exists() {
          self
            .load_file(&include_path)?;
        } else {
          warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (k, v) = line
        .split_once('=')
        .ok_or_else(|| {
          anyhow!(
            "invalid config line \
             {}:{}: {}",
            path.display(),
            line_num + 1,
            raw_line
          )
        })?;

      let key = k.trim().to_string();
      let value = v.trim().to_string();
      trace!(key = %key, value = %value, "loaded config key");
      self.map.insert(key, value);
    }

    Ok(())
  }
}

#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = if let Some(path) =
    override_dir
  {
    path.to_path_buf()
  } else if let Some(cfg_value) =
    cfg.get("data.location")
  {
    expand_tilde(Path::new(&cfg_value))
  } else {
    home_dir()?.join(".tempo")
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var(RC_ENV_VAR)
  {
    if rc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      rc_env
    )));
  }

  let candidate =
    home_dir()?.join(RC_FILE_NAME);
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn home_dir() -> anyhow::Result<PathBuf>
{
  dirs::home_dir().ok_or_else(|| {
    anyhow!(
      "cannot determine home \
       directory"
    )
  })
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let expanded =
    expand_tilde(Path::new(include));
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

fn parse_bool(s: &str) -> bool {
  matches!(
    s.trim()
      .to_ascii_lowercase()
      .as_str(),
    "1" | "y" | "yes" | "on" | "true"
  )
}

#[cfg(test)]
mod tests {
  use std::fs;

  use tempfile::tempdir;

  use super::Config;
  use crate::agenda::{
    SortMode,
    Tab
  };
  use crate::finder::DEFAULT_MAX_ITERATIONS;

  #[test]
  fn loads_rc_file_with_includes() {
    let dir = tempdir().expect("tempdir");
    let extra = dir.path().join("extra.rc");
    fs::write(
      &extra,
      "default.sort = priority\n"
    )
    .expect("write include");
    let rc = dir.path().join("main.rc");
    fs::write(
      &rc,
      "# tempo settings\n\
       default.tab = completed # trailing comment\n\
       include extra.rc\n\
       search.horizon = 400\n"
    )
    .expect("write rc");

    let cfg = Config::load(Some(rc.as_path()))
      .expect("load config");
    assert_eq!(cfg.loaded_files.len(), 2);
    assert_eq!(
      cfg.default_tab().expect("tab"),
      Tab::Completed
    );
    assert_eq!(
      cfg.default_sort().expect("sort"),
      SortMode::Priority
    );
    assert_eq!(
      cfg
        .search_horizon()
        .expect("horizon"),
      400
    );
    assert_eq!(
      cfg.get_bool("color"),
      Some(true)
    );
  }

  #[test]
  fn overrides_replace_values() {
    let mut cfg = Config::defaults();
    cfg.apply_overrides([(
      "rc.default.sort".to_string(),
      "custom".to_string()
    )]);
    assert_eq!(
      cfg.default_sort().expect("sort"),
      SortMode::Custom
    );
    assert_eq!(
      cfg
        .search_horizon()
        .expect("horizon"),
      DEFAULT_MAX_ITERATIONS
    );
    assert!(
      cfg
        .holidays()
        .expect("holidays")
        .is_empty()
    );
  }

  #[test]
  fn rejects_bad_values() {
    let mut cfg = Config::defaults();
    cfg.apply_overrides([
      (
        "default.tab".to_string(),
        "archive".to_string()
      ),
      (
        "search.horizon".to_string(),
        "0".to_string()
      )
    ]);
    assert!(cfg.default_tab().is_err());
    assert!(
      cfg.search_horizon().is_err()
    );
  }
}
