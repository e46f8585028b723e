// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 容器读取
pub mod reader;

/// 记录编解码
pub mod record;

/// 容器存储后端
pub mod store;

/// 容器写入与封存
pub mod writer;
