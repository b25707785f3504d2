//! Per-run scratch test definitions

use runwright_common::{Result, RunId};
use std::path::PathBuf;
use tracing::{debug, warn};

/// Writes and removes the transient test definition of each run
#[derive(Debug, Clone)]
pub struct ScratchStore {
    dir: PathBuf,
    screenshot_dir: PathBuf,
}

impl ScratchStore {
    /// `screenshot_dir` is embedded in the generated script as-is and is
    /// resolved by the test process relative to its working directory.
    pub fn new(dir: impl Into<PathBuf>, screenshot_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            screenshot_dir: screenshot_dir.into(),
        }
    }

    pub fn file_name(id: &RunId) -> String {
        format!("dynamic-{}.spec.js", id)
    }

    pub fn path_for(&self, id: &RunId) -> PathBuf {
        self.dir.join(Self::file_name(id))
    }

    /// Render the test definition for `url`.
    ///
    /// Values are embedded only as JSON string literals, which are valid
    /// JavaScript and cannot terminate the surrounding expression.
    pub fn render(&self, id: &RunId, url: &str) -> Result<String> {
        let url_literal = serde_json::to_string(url)?;
        let title_literal = serde_json::to_string(&format!("URL Visit Verification for {}", url))?;
        let screenshot = self.screenshot_dir.join(format!("{}.png", id));
        let screenshot_literal =
            serde_json::to_string(&screenshot.to_string_lossy().replace('\\', "/"))?;

        Ok(format!(
            r#"// @ts-check
import {{ test, expect }} from '@playwright/test';

const TARGET_URL = {url};

test.describe({title}, () => {{
  test('should successfully visit and verify the URL', async ({{ page }}) => {{
    await page.goto(TARGET_URL, {{ waitUntil: 'networkidle' }});

    const expectedHost = new URL(TARGET_URL).hostname;
    const currentHost = new URL(page.url()).hostname;
    expect(currentHost).toBe(expectedHost);

    const title = await page.title();
    expect(title).toBeTruthy();

    const bodyText = await page.textContent('body');
    expect(bodyText).toBeTruthy();

    const lowered = (bodyText || '').toLowerCase();
    if (lowered.includes('error') || lowered.includes('not found') || lowered.includes('404')) {{
      console.warn('Warning: page may contain error content');
    }}

    await page.screenshot({{ path: {screenshot}, fullPage: true }});
  }});
}});
"#,
            url = url_literal,
            title = title_literal,
            screenshot = screenshot_literal,
        ))
    }

    /// Write the test definition of a run, creating the directory if needed.
    pub async fn write(&self, id: &RunId, url: &str) -> Result<PathBuf> {
        let content = self.render(id, url)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(id);
        tokio::fs::write(&path, content).await?;
        debug!("Wrote test definition {}", path.display());
        Ok(path)
    }

    /// Remove the test definition of a run. Absent files are fine; other
    /// failures are logged and swallowed.
    pub async fn remove(&self, id: &RunId) {
        let path = self.path_for(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!("Removed test definition {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to clean up {}: {}", path.display(), e),
        }
    }
}
