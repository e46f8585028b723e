// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 重试策略
pub mod retry_policy;

/// Robots.txt检查
pub mod robots;

/// 日志初始化
pub mod telemetry;

/// URL处理
pub mod url_utils;
