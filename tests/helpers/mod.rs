// ABOUTME: Test helper modules shared by HTTP integration tests
// ABOUTME: Re-exports the in-process Axum request builder
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![allow(dead_code)]

pub mod axum_test;
