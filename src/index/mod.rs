// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 索引生成、归并与查询
pub mod indexer;

/// SURT排序键
pub mod surt;
