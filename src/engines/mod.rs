// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 浏览器引擎
pub mod browser_engine;

/// HTTP引擎
pub mod http_engine;

/// 引擎接口与类型
pub mod traits;

use std::sync::Arc;

use crate::domain::models::target::EngineKind;
use crate::engines::browser_engine::BrowserEngine;
use crate::engines::http_engine::HttpEngine;
use crate::engines::traits::{EngineError, FetchEngine};

/// 按目标配置构造引擎
pub fn create_engine(kind: EngineKind) -> Result<Arc<dyn FetchEngine>, EngineError> {
    match kind {
        EngineKind::Http => Ok(Arc::new(HttpEngine::new()?)),
        EngineKind::Browser => Ok(Arc::new(BrowserEngine::new()?)),
    }
}
