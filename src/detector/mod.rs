// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 变化检测
pub mod change_detector;

/// 快照摘要提取
pub mod summary;
