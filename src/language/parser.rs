use crate::language::{
    ast::{Ast, Node, NodeIndex, NodeTag, ParseError, TokenIndex, NULL_NODE},
    lexer::lex,
    span::Span,
    token::{Token, TokenTag},
};

/// Parse a whole buffer into a flat node array. Errors are collected, not
/// thrown: the parser recovers at declaration and statement boundaries so a
/// broken document still yields a tree for the surviving declarations.
pub fn parse(source: &str) -> Ast {
    let tokens = lex(source);
    let parser = Parser {
        source,
        tokens,
        pos: 0,
        last: 0,
        nodes: Vec::new(),
        extra: Vec::new(),
        root_decls: Vec::new(),
        errors: Vec::new(),
    };
    parser.run()
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    last: usize,
    nodes: Vec<Node>,
    extra: Vec<u32>,
    root_decls: Vec<NodeIndex>,
    errors: Vec<ParseError>,
}

impl<'a> Parser<'a> {
    fn run(mut self) -> Ast {
        self.nodes.push(Node {
            tag: NodeTag::Root,
            main_token: 0,
            lhs: 0,
            rhs: 0,
            span: Span::new(0, self.source.len()),
        });
        self.skip_trivia();
        while !self.at(TokenTag::Eof) {
            let before = self.pos;
            match self.parse_container_member() {
                Some(node) => self.root_decls.push(node),
                None => {
                    self.recover_to_decl();
                    if self.pos == before {
                        self.advance();
                    }
                }
            }
        }
        Ast {
            tokens: self.tokens,
            nodes: self.nodes,
            extra: self.extra,
            root_decls: self.root_decls,
            errors: self.errors,
        }
    }

    // ----- cursor -----

    fn skip_trivia(&mut self) {
        while self.pos < self.tokens.len() && self.tokens[self.pos].tag.is_trivia() {
            self.pos += 1;
        }
        if self.pos >= self.tokens.len() {
            self.pos = self.tokens.len() - 1;
        }
    }

    fn peek(&self) -> TokenTag {
        self.tokens[self.pos].tag
    }

    /// Tag of the non-trivia token after the current one.
    fn peek2(&self) -> TokenTag {
        let mut i = self.pos + 1;
        while i < self.tokens.len() && self.tokens[i].tag.is_trivia() {
            i += 1;
        }
        self.tokens[i.min(self.tokens.len() - 1)].tag
    }

    fn at(&self, tag: TokenTag) -> bool {
        self.peek() == tag
    }

    fn current(&self) -> TokenIndex {
        self.pos as TokenIndex
    }

    fn current_source(&self) -> &str {
        let span = self.tokens[self.pos].span;
        &self.source[span.start.min(self.source.len())..span.end.min(self.source.len())]
    }

    fn advance(&mut self) -> TokenIndex {
        let index = self.pos;
        if self.peek() != TokenTag::Eof {
            self.last = index;
            self.pos += 1;
            self.skip_trivia();
        }
        index as TokenIndex
    }

    fn eat(&mut self, tag: TokenTag) -> Option<TokenIndex> {
        self.at(tag).then(|| self.advance())
    }

    fn expect(&mut self, tag: TokenTag) -> Option<TokenIndex> {
        if self.at(tag) {
            Some(self.advance())
        } else {
            self.error(format!("expected {}", tag.describe()));
            None
        }
    }

    fn error(&mut self, message: impl Into<String>) {
        let token = self.current();
        // cascading failures at the same token collapse into one report
        if self.errors.last().is_some_and(|last| last.token == token) {
            return;
        }
        self.errors.push(ParseError {
            message: message.into(),
            token,
        });
    }

    // ----- building -----

    fn add_node(&mut self, tag: NodeTag, main_token: TokenIndex, lhs: u32, rhs: u32) -> NodeIndex {
        let span = self.span_from_token(main_token);
        self.add_node_spanned(tag, main_token, lhs, rhs, span)
    }

    fn add_node_spanned(
        &mut self,
        tag: NodeTag,
        main_token: TokenIndex,
        lhs: u32,
        rhs: u32,
        span: Span,
    ) -> NodeIndex {
        let index = self.nodes.len() as NodeIndex;
        self.nodes.push(Node {
            tag,
            main_token,
            lhs,
            rhs,
            span,
        });
        index
    }

    fn push_extra_range(&mut self, items: &[u32]) -> u32 {
        let index = self.extra.len() as u32;
        self.extra.push(items.len() as u32);
        self.extra.extend_from_slice(items);
        index
    }

    fn push_extra_record(&mut self, items: [u32; 5]) -> u32 {
        let index = self.extra.len() as u32;
        self.extra.extend_from_slice(&items);
        index
    }

    fn token_start(&self, token: TokenIndex) -> usize {
        self.tokens[token as usize].span.start
    }

    fn last_end(&self) -> usize {
        self.tokens[self.last].span.end
    }

    fn span_from_token(&self, start: TokenIndex) -> Span {
        Span::new(self.token_start(start), self.last_end())
    }

    fn widen(&mut self, node: NodeIndex, start: TokenIndex) {
        let span = Span::new(self.token_start(start), self.last_end());
        self.nodes[node as usize].span = span;
    }

    // ----- recovery -----

    fn recover_to_decl(&mut self) {
        loop {
            match self.peek() {
                TokenTag::Eof
                | TokenTag::KeywordConst
                | TokenTag::KeywordVar
                | TokenTag::KeywordFn
                | TokenTag::KeywordPub
                | TokenTag::KeywordTest => return,
                TokenTag::Semicolon | TokenTag::RBrace => {
                    self.advance();
                    return;
                }
                _ => {
                    self.advance();
                }
            }
        }
    }

    fn recover_to_stmt(&mut self) {
        loop {
            match self.peek() {
                TokenTag::Eof | TokenTag::RBrace => return,
                TokenTag::Semicolon => {
                    self.advance();
                    return;
                }
                _ => {
                    self.advance();
                }
            }
        }
    }

    // ----- declarations -----

    fn parse_container_member(&mut self) -> Option<NodeIndex> {
        let start = self.current();
        self.eat(TokenTag::KeywordPub);
        match self.peek() {
            TokenTag::KeywordConst | TokenTag::KeywordVar => {
                let node = self.parse_var_decl()?;
                self.widen(node, start);
                Some(node)
            }
            TokenTag::KeywordFn => {
                let node = self.parse_fn_decl()?;
                self.widen(node, start);
                Some(node)
            }
            TokenTag::KeywordTest => self.parse_test_decl(),
            TokenTag::Identifier => self.parse_container_field(),
            _ => {
                self.error("expected a declaration");
                None
            }
        }
    }

    fn parse_var_decl(&mut self) -> Option<NodeIndex> {
        let mut_token = self.advance();
        self.expect(TokenTag::Identifier)?;
        let type_node = if self.eat(TokenTag::Colon).is_some() {
            self.parse_expr()?
        } else {
            NULL_NODE
        };
        let init_node = if self.eat(TokenTag::Equal).is_some() {
            self.parse_expr()?
        } else {
            NULL_NODE
        };
        if self.expect(TokenTag::Semicolon).is_none() {
            self.recover_to_stmt();
        }
        let node = self.add_node(NodeTag::VarDecl, mut_token, type_node, init_node);
        self.widen(node, mut_token);
        Some(node)
    }

    fn parse_fn_decl(&mut self) -> Option<NodeIndex> {
        let fn_token = self.current();
        let proto = self.parse_fn_proto()?;
        let body = if self.at(TokenTag::LBrace) {
            self.parse_block(None)?
        } else {
            self.expect(TokenTag::Semicolon);
            NULL_NODE
        };
        let node = self.add_node(NodeTag::FnDecl, fn_token, proto, body);
        self.widen(node, fn_token);
        Some(node)
    }

    fn parse_fn_proto(&mut self) -> Option<NodeIndex> {
        let fn_token = self.advance();
        self.eat(TokenTag::Identifier);
        self.expect(TokenTag::LParen)?;
        let mut params = Vec::new();
        while !self.at(TokenTag::RParen) && !self.at(TokenTag::Eof) {
            if let Some(param) = self.parse_param() {
                params.push(param);
            } else {
                self.recover_to_stmt();
                break;
            }
            if self.eat(TokenTag::Comma).is_none() {
                break;
            }
        }
        self.expect(TokenTag::RParen);
        let return_type = match self.peek() {
            TokenTag::LBrace | TokenTag::Semicolon | TokenTag::Eof => {
                self.error("expected return type");
                NULL_NODE
            }
            _ => self.parse_expr()?,
        };
        let range = self.push_extra_range(&params);
        let node = self.add_node(NodeTag::FnProto, fn_token, range, return_type);
        self.widen(node, fn_token);
        Some(node)
    }

    fn parse_param(&mut self) -> Option<NodeIndex> {
        // `comptime` is not a reserved word in this subset; skip it when it
        // prefixes a parameter name.
        if self.at(TokenTag::Identifier)
            && self.current_source() == "comptime"
            && self.peek2() == TokenTag::Identifier
        {
            self.advance();
        }
        let name = self.expect(TokenTag::Identifier)?;
        self.expect(TokenTag::Colon)?;
        let type_node = if self.eat(TokenTag::KeywordAnytype).is_some() {
            NULL_NODE
        } else {
            self.parse_expr()?
        };
        let node = self.add_node(NodeTag::Param, name, type_node, 0);
        self.widen(node, name);
        Some(node)
    }

    fn parse_test_decl(&mut self) -> Option<NodeIndex> {
        let test_token = self.advance();
        let name = self.eat(TokenTag::StringLiteral);
        let body = if self.at(TokenTag::LBrace) {
            self.parse_block(None)?
        } else {
            self.error("expected a block");
            return None;
        };
        let lhs = name.map(|token| token + 1).unwrap_or(0);
        let node = self.add_node(NodeTag::TestDecl, test_token, lhs, body);
        self.widen(node, test_token);
        Some(node)
    }

    fn parse_container_field(&mut self) -> Option<NodeIndex> {
        let name = self.advance();
        let type_node = if self.eat(TokenTag::Colon).is_some() {
            self.parse_expr()?
        } else {
            NULL_NODE
        };
        let value_node = if self.eat(TokenTag::Equal).is_some() {
            self.parse_expr()?
        } else {
            NULL_NODE
        };
        if !self.at(TokenTag::RBrace) && !self.at(TokenTag::Eof) {
            self.expect(TokenTag::Comma);
        }
        let node = self.add_node(NodeTag::ContainerField, name, type_node, value_node);
        self.widen(node, name);
        Some(node)
    }

    // ----- statements -----

    fn parse_block(&mut self, label: Option<TokenIndex>) -> Option<NodeIndex> {
        let lbrace = self.expect(TokenTag::LBrace)?;
        let mut stmts = Vec::new();
        while !self.at(TokenTag::RBrace) && !self.at(TokenTag::Eof) {
            match self.parse_statement() {
                Some(stmt) => stmts.push(stmt),
                None => self.recover_to_stmt(),
            }
        }
        self.expect(TokenTag::RBrace);
        let range = self.push_extra_range(&stmts);
        let rhs = label.map(|token| token + 1).unwrap_or(0);
        let node = self.add_node(NodeTag::Block, lbrace, range, rhs);
        self.widen(node, label.unwrap_or(lbrace));
        Some(node)
    }

    fn parse_statement(&mut self) -> Option<NodeIndex> {
        match self.peek() {
            TokenTag::KeywordConst | TokenTag::KeywordVar => self.parse_var_decl(),
            TokenTag::KeywordDefer => {
                let token = self.advance();
                let body = if self.at(TokenTag::LBrace) {
                    self.parse_block(None)?
                } else {
                    let expr = self.parse_expr()?;
                    self.expect(TokenTag::Semicolon);
                    expr
                };
                let node = self.add_node(NodeTag::Defer, token, body, 0);
                self.widen(node, token);
                Some(node)
            }
            TokenTag::KeywordReturn => {
                let token = self.advance();
                let value = if self.at(TokenTag::Semicolon) {
                    NULL_NODE
                } else {
                    self.parse_expr()?
                };
                self.expect(TokenTag::Semicolon);
                let node = self.add_node(NodeTag::Return, token, value, 0);
                self.widen(node, token);
                Some(node)
            }
            TokenTag::KeywordBreak => {
                let token = self.advance();
                let label = if self.eat(TokenTag::Colon).is_some() {
                    self.expect(TokenTag::Identifier).map(|t| t + 1).unwrap_or(0)
                } else {
                    0
                };
                let value = if self.at(TokenTag::Semicolon) {
                    NULL_NODE
                } else {
                    self.parse_expr()?
                };
                self.expect(TokenTag::Semicolon);
                let node = self.add_node(NodeTag::Break, token, label, value);
                self.widen(node, token);
                Some(node)
            }
            TokenTag::KeywordContinue => {
                let token = self.advance();
                let label = if self.eat(TokenTag::Colon).is_some() {
                    self.expect(TokenTag::Identifier).map(|t| t + 1).unwrap_or(0)
                } else {
                    0
                };
                self.expect(TokenTag::Semicolon);
                let node = self.add_node(NodeTag::Continue, token, label, 0);
                self.widen(node, token);
                Some(node)
            }
            TokenTag::KeywordIf => {
                let node = self.parse_if()?;
                self.eat(TokenTag::Semicolon);
                Some(node)
            }
            TokenTag::KeywordWhile => {
                let node = self.parse_while(None)?;
                self.eat(TokenTag::Semicolon);
                Some(node)
            }
            TokenTag::KeywordFor => {
                let node = self.parse_for(None)?;
                self.eat(TokenTag::Semicolon);
                Some(node)
            }
            TokenTag::KeywordSwitch => {
                let node = self.parse_switch()?;
                self.eat(TokenTag::Semicolon);
                Some(node)
            }
            TokenTag::LBrace => self.parse_block(None),
            TokenTag::Identifier if self.peek2() == TokenTag::Colon => {
                // labeled block or loop
                let label = self.advance();
                self.advance();
                match self.peek() {
                    TokenTag::LBrace => self.parse_block(Some(label)),
                    TokenTag::KeywordWhile => {
                        let node = self.parse_while(Some(label))?;
                        self.eat(TokenTag::Semicolon);
                        Some(node)
                    }
                    TokenTag::KeywordFor => {
                        let node = self.parse_for(Some(label))?;
                        self.eat(TokenTag::Semicolon);
                        Some(node)
                    }
                    _ => {
                        self.error("expected a block or loop after label");
                        None
                    }
                }
            }
            _ => {
                let node = self.parse_assign_expr()?;
                self.expect(TokenTag::Semicolon);
                Some(node)
            }
        }
    }

    fn parse_assign_expr(&mut self) -> Option<NodeIndex> {
        let start = self.current();
        let expr = self.parse_expr()?;
        if matches!(
            self.peek(),
            TokenTag::Equal
                | TokenTag::PlusEqual
                | TokenTag::MinusEqual
                | TokenTag::AsteriskEqual
                | TokenTag::SlashEqual
                | TokenTag::PercentEqual
        ) {
            let op = self.advance();
            let rhs = self.parse_expr()?;
            let node = self.add_node(NodeTag::BinOp, op, expr, rhs);
            self.widen(node, start);
            return Some(node);
        }
        Some(expr)
    }

    fn parse_payload(&mut self) -> (u32, u32) {
        if self.eat(TokenTag::Pipe).is_none() {
            return (0, 0);
        }
        self.eat(TokenTag::Asterisk);
        let payload = self.expect(TokenTag::Identifier).map(|t| t + 1).unwrap_or(0);
        let index = if self.eat(TokenTag::Comma).is_some() {
            self.expect(TokenTag::Identifier).map(|t| t + 1).unwrap_or(0)
        } else {
            0
        };
        self.expect(TokenTag::Pipe);
        (payload, index)
    }

    fn parse_block_or_expr(&mut self) -> Option<NodeIndex> {
        if self.at(TokenTag::LBrace) {
            self.parse_block(None)
        } else {
            self.parse_expr()
        }
    }

    fn parse_if(&mut self) -> Option<NodeIndex> {
        let if_token = self.advance();
        self.expect(TokenTag::LParen)?;
        let cond = self.parse_expr()?;
        self.expect(TokenTag::RParen);
        let (payload, _) = self.parse_payload();
        let then_node = self.parse_block_or_expr()?;
        let (else_node, else_payload) = if self.eat(TokenTag::KeywordElse).is_some() {
            let (else_pl, _) = self.parse_payload();
            (self.parse_block_or_expr()?, else_pl)
        } else {
            (NULL_NODE, 0)
        };
        let record = self.push_extra_record([then_node, else_node, payload, else_payload, 0]);
        let node = self.add_node(NodeTag::If, if_token, cond, record);
        self.widen(node, if_token);
        Some(node)
    }

    fn parse_while(&mut self, label: Option<TokenIndex>) -> Option<NodeIndex> {
        let while_token = self.advance();
        self.expect(TokenTag::LParen)?;
        let cond = self.parse_expr()?;
        self.expect(TokenTag::RParen);
        let (payload, _) = self.parse_payload();
        let continue_expr = if self.eat(TokenTag::Colon).is_some() {
            self.expect(TokenTag::LParen)?;
            let expr = self.parse_assign_expr()?;
            self.expect(TokenTag::RParen);
            expr
        } else {
            NULL_NODE
        };
        let body = self.parse_block_or_expr()?;
        let else_node = if self.eat(TokenTag::KeywordElse).is_some() {
            self.parse_block_or_expr()?
        } else {
            NULL_NODE
        };
        let record = self.push_extra_record([body, else_node, payload, 0, continue_expr]);
        let node = self.add_node(NodeTag::While, while_token, cond, record);
        self.widen(node, label.unwrap_or(while_token));
        Some(node)
    }

    fn parse_for(&mut self, label: Option<TokenIndex>) -> Option<NodeIndex> {
        let for_token = self.advance();
        self.expect(TokenTag::LParen)?;
        let iterable = self.parse_expr()?;
        self.expect(TokenTag::RParen);
        let (payload, index_payload) = self.parse_payload();
        let body = self.parse_block_or_expr()?;
        let else_node = if self.eat(TokenTag::KeywordElse).is_some() {
            self.parse_block_or_expr()?
        } else {
            NULL_NODE
        };
        let record = self.push_extra_record([body, else_node, payload, index_payload, 0]);
        let node = self.add_node(NodeTag::For, for_token, iterable, record);
        self.widen(node, label.unwrap_or(for_token));
        Some(node)
    }

    fn parse_switch(&mut self) -> Option<NodeIndex> {
        let switch_token = self.advance();
        self.expect(TokenTag::LParen)?;
        let operand = self.parse_expr()?;
        self.expect(TokenTag::RParen);
        self.expect(TokenTag::LBrace)?;
        let mut prongs = Vec::new();
        while !self.at(TokenTag::RBrace) && !self.at(TokenTag::Eof) {
            match self.parse_switch_prong() {
                Some(prong) => prongs.push(prong),
                None => self.recover_to_stmt(),
            }
            self.eat(TokenTag::Comma);
        }
        self.expect(TokenTag::RBrace);
        let range = self.push_extra_range(&prongs);
        let node = self.add_node(NodeTag::Switch, switch_token, operand, range);
        self.widen(node, switch_token);
        Some(node)
    }

    fn parse_switch_prong(&mut self) -> Option<NodeIndex> {
        let start = self.current();
        let mut items = Vec::new();
        if self.eat(TokenTag::KeywordElse).is_none() {
            loop {
                items.push(self.parse_expr()?);
                if self.eat(TokenTag::Comma).is_none() {
                    break;
                }
                if self.at(TokenTag::FatArrow) {
                    break;
                }
            }
        }
        let arrow = self.expect(TokenTag::FatArrow)?;
        self.parse_payload();
        let body = self.parse_block_or_expr()?;
        let range = self.push_extra_range(&items);
        let node = self.add_node(NodeTag::SwitchProng, arrow, range, body);
        self.widen(node, start);
        Some(node)
    }

    // ----- expressions -----

    fn parse_expr(&mut self) -> Option<NodeIndex> {
        self.parse_bool_or()
    }

    fn parse_bool_or(&mut self) -> Option<NodeIndex> {
        let start = self.current();
        let mut lhs = self.parse_bool_and()?;
        while self.at(TokenTag::KeywordOr) {
            let op = self.advance();
            let rhs = self.parse_bool_and()?;
            lhs = self.add_node(NodeTag::BinOp, op, lhs, rhs);
            self.widen(lhs, start);
        }
        Some(lhs)
    }

    fn parse_bool_and(&mut self) -> Option<NodeIndex> {
        let start = self.current();
        let mut lhs = self.parse_compare()?;
        while self.at(TokenTag::KeywordAnd) {
            let op = self.advance();
            let rhs = self.parse_compare()?;
            lhs = self.add_node(NodeTag::BinOp, op, lhs, rhs);
            self.widen(lhs, start);
        }
        Some(lhs)
    }

    fn parse_compare(&mut self) -> Option<NodeIndex> {
        let start = self.current();
        let lhs = self.parse_bitwise()?;
        if matches!(
            self.peek(),
            TokenTag::EqualEqual
                | TokenTag::BangEqual
                | TokenTag::Less
                | TokenTag::LessEqual
                | TokenTag::Greater
                | TokenTag::GreaterEqual
        ) {
            let op = self.advance();
            let rhs = self.parse_bitwise()?;
            let node = self.add_node(NodeTag::BinOp, op, lhs, rhs);
            self.widen(node, start);
            return Some(node);
        }
        Some(lhs)
    }

    fn parse_bitwise(&mut self) -> Option<NodeIndex> {
        let start = self.current();
        let mut lhs = self.parse_additive()?;
        loop {
            match self.peek() {
                TokenTag::Ampersand | TokenTag::Caret | TokenTag::Pipe | TokenTag::KeywordOrelse => {
                    let op = self.advance();
                    let rhs = self.parse_additive()?;
                    lhs = self.add_node(NodeTag::BinOp, op, lhs, rhs);
                    self.widen(lhs, start);
                }
                TokenTag::KeywordCatch => {
                    let op = self.advance();
                    self.parse_payload();
                    let rhs = if self.at(TokenTag::LBrace) {
                        self.parse_block(None)?
                    } else {
                        self.parse_additive()?
                    };
                    lhs = self.add_node(NodeTag::Catch, op, lhs, rhs);
                    self.widen(lhs, start);
                }
                _ => return Some(lhs),
            }
        }
    }

    fn parse_additive(&mut self) -> Option<NodeIndex> {
        let start = self.current();
        let mut lhs = self.parse_multiplicative()?;
        while matches!(self.peek(), TokenTag::Plus | TokenTag::Minus) {
            let op = self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = self.add_node(NodeTag::BinOp, op, lhs, rhs);
            self.widen(lhs, start);
        }
        Some(lhs)
    }

    fn parse_multiplicative(&mut self) -> Option<NodeIndex> {
        let start = self.current();
        let mut lhs = self.parse_error_union()?;
        while matches!(
            self.peek(),
            TokenTag::Asterisk | TokenTag::Slash | TokenTag::Percent
        ) {
            let op = self.advance();
            let rhs = self.parse_error_union()?;
            lhs = self.add_node(NodeTag::BinOp, op, lhs, rhs);
            self.widen(lhs, start);
        }
        Some(lhs)
    }

    /// `E!T` binds between prefix and multiplication, like Zig.
    fn parse_error_union(&mut self) -> Option<NodeIndex> {
        let start = self.current();
        let lhs = self.parse_prefix()?;
        if self.at(TokenTag::Bang) {
            let bang = self.advance();
            let rhs = self.parse_prefix()?;
            let node = self.add_node(NodeTag::ErrorUnionType, bang, lhs, rhs);
            self.widen(node, start);
            return Some(node);
        }
        Some(lhs)
    }

    fn parse_prefix(&mut self) -> Option<NodeIndex> {
        let start = self.current();
        match self.peek() {
            TokenTag::KeywordTry => {
                let token = self.advance();
                let operand = self.parse_prefix()?;
                let node = self.add_node(NodeTag::Try, token, operand, 0);
                self.widen(node, start);
                Some(node)
            }
            TokenTag::Minus | TokenTag::Ampersand | TokenTag::Tilde => {
                let token = self.advance();
                let operand = self.parse_prefix()?;
                let node = self.add_node(NodeTag::UnOp, token, operand, 0);
                self.widen(node, start);
                Some(node)
            }
            TokenTag::Bang => {
                // `!T` (inferred-error-set union) and `!cond` share a node;
                // the distinction does not matter to symbol lookup.
                let token = self.advance();
                let operand = self.parse_prefix()?;
                let node = self.add_node(NodeTag::ErrorUnionType, token, NULL_NODE, operand);
                self.widen(node, start);
                Some(node)
            }
            TokenTag::Asterisk => {
                let token = self.advance();
                self.eat(TokenTag::KeywordConst);
                let child = self.parse_prefix()?;
                let node = self.add_node(NodeTag::PtrType, token, child, 0);
                self.widen(node, start);
                Some(node)
            }
            TokenTag::Question => {
                let token = self.advance();
                let child = self.parse_prefix()?;
                let node = self.add_node(NodeTag::OptionalType, token, child, 0);
                self.widen(node, start);
                Some(node)
            }
            TokenTag::LBracket => {
                let token = self.advance();
                if self.eat(TokenTag::RBracket).is_some() {
                    self.eat(TokenTag::KeywordConst);
                    let elem = self.parse_prefix()?;
                    let node = self.add_node(NodeTag::SliceType, token, elem, 0);
                    self.widen(node, start);
                    Some(node)
                } else {
                    let len = self.parse_expr()?;
                    self.expect(TokenTag::RBracket);
                    self.eat(TokenTag::KeywordConst);
                    let elem = self.parse_prefix()?;
                    let node = self.add_node(NodeTag::ArrayType, token, len, elem);
                    self.widen(node, start);
                    Some(node)
                }
            }
            _ => {
                let primary = self.parse_primary()?;
                self.parse_postfix(primary, start)
            }
        }
    }

    fn parse_postfix(&mut self, mut expr: NodeIndex, start: TokenIndex) -> Option<NodeIndex> {
        loop {
            match self.peek() {
                TokenTag::LParen => {
                    let lparen = self.advance();
                    let mut args = Vec::new();
                    while !self.at(TokenTag::RParen) && !self.at(TokenTag::Eof) {
                        args.push(self.parse_expr()?);
                        if self.eat(TokenTag::Comma).is_none() {
                            break;
                        }
                    }
                    self.expect(TokenTag::RParen);
                    let range = self.push_extra_range(&args);
                    expr = self.add_node(NodeTag::Call, lparen, expr, range);
                    self.widen(expr, start);
                }
                TokenTag::Dot => {
                    if self.peek2() == TokenTag::Dot {
                        // range operand of a slice expression, not ours
                        return Some(expr);
                    }
                    let dot = self.advance();
                    if self.at(TokenTag::Identifier) {
                        let name = self.advance();
                        expr = self.add_node(NodeTag::FieldAccess, dot, expr, name);
                        self.widen(expr, start);
                    } else {
                        self.error("expected a field name");
                        return Some(expr);
                    }
                }
                TokenTag::DotStar => {
                    let token = self.advance();
                    expr = self.add_node(NodeTag::Deref, token, expr, 0);
                    self.widen(expr, start);
                }
                TokenTag::DotQuestion => {
                    let token = self.advance();
                    expr = self.add_node(NodeTag::UnwrapOptional, token, expr, 0);
                    self.widen(expr, start);
                }
                TokenTag::LBracket => {
                    let lbracket = self.advance();
                    let index = self.parse_expr()?;
                    if self.at(TokenTag::Dot) && self.peek2() == TokenTag::Dot {
                        self.advance();
                        self.advance();
                        if !self.at(TokenTag::RBracket) {
                            self.parse_expr()?;
                        }
                    }
                    self.expect(TokenTag::RBracket);
                    expr = self.add_node(NodeTag::BinOp, lbracket, expr, index);
                    self.widen(expr, start);
                }
                TokenTag::LBrace if self.struct_init_ahead(expr) => {
                    expr = self.parse_struct_init(expr, start)?;
                }
                _ => return Some(expr),
            }
        }
    }

    /// `P{ .x = 1 }` only when the callee looks like a type and the brace is
    /// followed by a field initializer or an immediate close.
    fn struct_init_ahead(&self, expr: NodeIndex) -> bool {
        if !matches!(
            self.nodes[expr as usize].tag,
            NodeTag::Identifier | NodeTag::FieldAccess
        ) {
            return false;
        }
        matches!(self.peek2(), TokenTag::Dot | TokenTag::RBrace)
    }

    fn parse_struct_init(&mut self, type_expr: NodeIndex, start: TokenIndex) -> Option<NodeIndex> {
        let lbrace = self.advance();
        let mut inits = Vec::new();
        while !self.at(TokenTag::RBrace) && !self.at(TokenTag::Eof) {
            self.expect(TokenTag::Dot)?;
            let name = self.expect(TokenTag::Identifier)?;
            self.expect(TokenTag::Equal)?;
            let value = self.parse_expr()?;
            let init = self.add_node(NodeTag::FieldInit, name, value, 0);
            self.widen(init, name);
            inits.push(init);
            if self.eat(TokenTag::Comma).is_none() {
                break;
            }
        }
        self.expect(TokenTag::RBrace);
        let range = self.push_extra_range(&inits);
        let node = self.add_node_spanned(
            NodeTag::StructInit,
            lbrace,
            type_expr,
            range,
            Span::default(),
        );
        self.widen(node, start);
        Some(node)
    }

    fn parse_primary(&mut self) -> Option<NodeIndex> {
        let start = self.current();
        match self.peek() {
            TokenTag::Identifier => {
                if self.peek2() == TokenTag::Colon {
                    // labeled block expression: `blk: { ... }`
                    let label = self.advance();
                    self.advance();
                    if self.at(TokenTag::LBrace) {
                        return self.parse_block(Some(label));
                    }
                    self.error("expected a block after label");
                    return None;
                }
                let token = self.advance();
                Some(self.add_node(NodeTag::Identifier, token, 0, 0))
            }
            TokenTag::NumberLiteral => {
                let token = self.advance();
                Some(self.add_node(NodeTag::NumberLiteral, token, 0, 0))
            }
            TokenTag::StringLiteral => {
                let token = self.advance();
                Some(self.add_node(NodeTag::StringLiteral, token, 0, 0))
            }
            TokenTag::CharLiteral => {
                let token = self.advance();
                Some(self.add_node(NodeTag::CharLiteral, token, 0, 0))
            }
            TokenTag::KeywordTrue | TokenTag::KeywordFalse => {
                let token = self.advance();
                Some(self.add_node(NodeTag::BoolLiteral, token, 0, 0))
            }
            TokenTag::KeywordNull => {
                let token = self.advance();
                Some(self.add_node(NodeTag::NullLiteral, token, 0, 0))
            }
            TokenTag::KeywordUndefined => {
                let token = self.advance();
                Some(self.add_node(NodeTag::UndefinedLiteral, token, 0, 0))
            }
            TokenTag::Builtin => {
                let token = self.advance();
                self.expect(TokenTag::LParen)?;
                let mut args = Vec::new();
                while !self.at(TokenTag::RParen) && !self.at(TokenTag::Eof) {
                    args.push(self.parse_expr()?);
                    if self.eat(TokenTag::Comma).is_none() {
                        break;
                    }
                }
                self.expect(TokenTag::RParen);
                let range = self.push_extra_range(&args);
                let node = self.add_node(NodeTag::BuiltinCall, token, range, 0);
                self.widen(node, start);
                Some(node)
            }
            TokenTag::LParen => {
                let lparen = self.advance();
                let inner = self.parse_expr()?;
                self.expect(TokenTag::RParen);
                let node = self.add_node(NodeTag::Grouped, lparen, inner, 0);
                self.widen(node, start);
                Some(node)
            }
            TokenTag::KeywordStruct
            | TokenTag::KeywordEnum
            | TokenTag::KeywordUnion
            | TokenTag::KeywordOpaque => self.parse_container_decl(),
            TokenTag::KeywordError => {
                let error_token = self.advance();
                if self.eat(TokenTag::Dot).is_some() {
                    let name = self.expect(TokenTag::Identifier)?;
                    let node = self.add_node(NodeTag::ErrorValue, name, 0, 0);
                    self.widen(node, error_token);
                    Some(node)
                } else if self.at(TokenTag::LBrace) {
                    self.advance();
                    let mut names = Vec::new();
                    while !self.at(TokenTag::RBrace) && !self.at(TokenTag::Eof) {
                        if let Some(name) = self.expect(TokenTag::Identifier) {
                            names.push(name);
                        } else {
                            break;
                        }
                        if self.eat(TokenTag::Comma).is_none() {
                            break;
                        }
                    }
                    self.expect(TokenTag::RBrace);
                    let range = self.push_extra_range(&names);
                    let node = self.add_node(NodeTag::ErrorSetDecl, error_token, range, 0);
                    self.widen(node, error_token);
                    Some(node)
                } else {
                    self.error("expected '.' or '{' after 'error'");
                    None
                }
            }
            TokenTag::Dot => {
                let dot = self.advance();
                if self.at(TokenTag::Identifier) {
                    let name = self.advance();
                    let node = self.add_node(NodeTag::EnumLiteral, name, 0, 0);
                    self.widen(node, dot);
                    Some(node)
                } else if self.at(TokenTag::LBrace) {
                    self.parse_struct_init(NULL_NODE, dot)
                } else {
                    self.error("expected an enum literal or initializer");
                    None
                }
            }
            TokenTag::KeywordIf => self.parse_if(),
            TokenTag::KeywordWhile => self.parse_while(None),
            TokenTag::KeywordFor => self.parse_for(None),
            TokenTag::KeywordSwitch => self.parse_switch(),
            TokenTag::LBrace => self.parse_block(None),
            _ => {
                self.error("expected expression");
                None
            }
        }
    }

    fn parse_container_decl(&mut self) -> Option<NodeIndex> {
        let keyword = self.advance();
        // tag/backing type: `enum(u8)`, `union(enum)`
        if self.eat(TokenTag::LParen).is_some() {
            if !self.at(TokenTag::RParen) {
                if self.eat(TokenTag::KeywordEnum).is_none() {
                    self.parse_expr()?;
                }
            }
            self.expect(TokenTag::RParen);
        }
        self.expect(TokenTag::LBrace)?;
        let mut members = Vec::new();
        while !self.at(TokenTag::RBrace) && !self.at(TokenTag::Eof) {
            match self.parse_container_member() {
                Some(member) => members.push(member),
                None => {
                    self.recover_to_stmt();
                    if self.at(TokenTag::RBrace) || self.at(TokenTag::Eof) {
                        break;
                    }
                }
            }
        }
        self.expect(TokenTag::RBrace);
        let range = self.push_extra_range(&members);
        let node = self.add_node(NodeTag::ContainerDecl, keyword, range, 0);
        self.widen(node, keyword);
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_struct_with_fields_and_decls() {
        let source = "pub const Point = struct {\n    x: i32,\n    y: i32,\n    pub fn new(x: i32, y: i32) Point {\n        return Point{ .x = x, .y = y };\n    }\n};";
        let ast = parse(source);
        assert!(ast.errors.is_empty(), "{:?}", ast.errors);
        let decl = ast.var_decl(ast.root_decls[0]).expect("var decl");
        assert_eq!(ast.node_tag(decl.init_node), NodeTag::ContainerDecl);
        let members = ast.container_members(decl.init_node);
        assert_eq!(members.len(), 3);
        assert_eq!(ast.node_tag(members[0]), NodeTag::ContainerField);
        assert_eq!(ast.node_tag(members[2]), NodeTag::FnDecl);
    }

    #[test]
    fn parses_import_alias() {
        let source = "const std = @import(\"std\");\nconst A = std.mem;";
        let ast = parse(source);
        assert!(ast.errors.is_empty(), "{:?}", ast.errors);
        let std_decl = ast.var_decl(ast.root_decls[0]).unwrap();
        assert_eq!(ast.node_tag(std_decl.init_node), NodeTag::BuiltinCall);
        let alias = ast.var_decl(ast.root_decls[1]).unwrap();
        assert_eq!(ast.node_tag(alias.init_node), NodeTag::FieldAccess);
    }

    #[test]
    fn parses_control_flow_with_payloads() {
        let source = "fn walk(items: []i32, opt: ?i32) void {\n    if (opt) |value| {\n        _ = value;\n    }\n    for (items) |item, i| {\n        _ = item;\n        _ = i;\n    }\n    outer: while (true) {\n        break :outer;\n    }\n}";
        let ast = parse(source);
        assert!(ast.errors.is_empty(), "{:?}", ast.errors);
        let body = ast.node(ast.root_decls[0]).rhs;
        let stmts = ast.extra_range(ast.node(body).lhs).to_vec();
        assert_eq!(ast.node_tag(stmts[0]), NodeTag::If);
        assert!(ast.loop_data(stmts[0]).payload_token.is_some());
        assert_eq!(ast.node_tag(stmts[1]), NodeTag::For);
        let for_data = ast.loop_data(stmts[1]);
        assert!(for_data.payload_token.is_some());
        assert!(for_data.index_payload_token.is_some());
        assert_eq!(ast.node_tag(stmts[2]), NodeTag::While);
    }

    #[test]
    fn parses_error_union_and_try() {
        let source = "fn read(n: i32) anyerror!i32 {\n    const x = try parse(n);\n    return x catch 0;\n}";
        let ast = parse(source);
        assert!(ast.errors.is_empty(), "{:?}", ast.errors);
        let proto = ast.fn_proto(ast.root_decls[0]).unwrap();
        assert_eq!(ast.node_tag(proto.return_type), NodeTag::ErrorUnionType);
    }

    #[test]
    fn records_error_for_incomplete_function() {
        let ast = parse("fn (");
        assert!(!ast.errors.is_empty());
    }

    #[test]
    fn recovers_after_broken_declaration() {
        let source = "const broken = ;\nconst ok = 1;";
        let ast = parse(source);
        assert!(!ast.errors.is_empty());
        let names: Vec<_> = ast
            .root_decls
            .iter()
            .filter_map(|&decl| ast.var_decl(decl))
            .map(|decl| ast.token_source(source, decl.name_token).to_string())
            .collect();
        assert!(names.contains(&"ok".to_string()), "{names:?}");
    }

    #[test]
    fn parses_switch_with_prongs() {
        let source = "fn pick(c: Color) i32 {\n    return switch (c) {\n        .red => 1,\n        .green, .blue => |v| 2,\n        else => 0,\n    };\n}";
        let ast = parse(source);
        assert!(ast.errors.is_empty(), "{:?}", ast.errors);
    }

    #[test]
    fn statement_expression_keeps_assignment() {
        let source = "fn set(p: *i32) void {\n    p.* = 3;\n}";
        let ast = parse(source);
        assert!(ast.errors.is_empty(), "{:?}", ast.errors);
    }
}
